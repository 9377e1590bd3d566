use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A per-user, per-currency holding.
///
/// Balances are written by deposit tooling (see the `deposit` CLI command)
/// and read by the balance view; the matching path neither reserves funds at
/// order placement nor settles them at execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub user_id: Uuid,
    pub currency: String,
    pub balance: Decimal,
}

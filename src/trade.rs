use std::time::SystemTime;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::instrument::Pair;

/// An immutable record of one matching event between a resting bid and a
/// resting ask. Created exactly once per crossing, in the same store commit
/// that depletes the two orders, and never updated or deleted afterwards.
///
/// The execution price is always the ask's limit price: when the best bid
/// crosses at or above the best ask, the earlier-ranked resting ask sets the
/// price and the bid gets the price improvement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub pair: Pair,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub price: Decimal,
    pub quantity: Decimal,
    pub executed_at: SystemTime,
}

impl Trade {
    /// Quote volume moved by this trade.
    pub fn volume(&self) -> Decimal {
        self.price * self.quantity
    }
}

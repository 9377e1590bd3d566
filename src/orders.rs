use std::time::SystemTime;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::instrument::Pair;

/// Every price and quantity in the system is a fixed-point decimal with at
/// most this many fractional digits. Matching subtracts quantities from each
/// other repeatedly, so inputs are rejected up front rather than rounded:
/// two conforming decimals subtract exactly, and a filled order lands on
/// exactly zero.
pub const MAX_DECIMAL_PLACES: u32 = 8;

/// Represents which side of the market the order is on.
///
/// - `Buy` (bid): sorted from **highest to lowest price** — a higher price is
///   a more aggressive buy.
/// - `Sell` (ask): sorted from **lowest to highest price** — a lower price is
///   a more aggressive sell.
///
/// This sorting ensures the matching engine always finds the best price
/// first: buyers match the lowest ask, sellers match the highest bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// Lifecycle of an order. `Open` orders rest in the book; `Filled` and
/// `Cancelled` are terminal and never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Open,
    Filled,
    Cancelled,
}

/// A resting or historical intent to trade.
///
/// `quantity` is the *remaining* quantity: it only ever decreases, and it
/// reaches exactly zero at the moment the order becomes `Filled`. `price` is
/// fixed at creation. `seq` is the store-assigned arrival number used to
/// break ties between equal prices; `created_at` alone is too coarse when
/// two orders land in the same clock tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub pair: Pair,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub status: OrderStatus,
    pub created_at: SystemTime,
    pub seq: u64,
}

impl Order {
    /// Consume `qty` of the remaining quantity. Reaching exactly zero flips
    /// the order to `Filled`; anything short of that leaves it `Open`.
    pub fn apply_fill(&mut self, qty: Decimal) {
        self.quantity -= qty;
        if self.quantity.is_zero() {
            self.status = OrderStatus::Filled;
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }
}

/// Order submission payload, validated before it reaches the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub pair: Pair,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidOrder {
    #[error("price must be > 0")]
    NonPositivePrice,
    #[error("quantity must be > 0")]
    NonPositiveQuantity,
    #[error("price has more than 8 decimal places")]
    PriceTooPrecise,
    #[error("quantity has more than 8 decimal places")]
    QuantityTooPrecise,
}

impl NewOrder {
    pub fn validate(&self) -> Result<(), InvalidOrder> {
        if self.price <= Decimal::ZERO {
            return Err(InvalidOrder::NonPositivePrice);
        }
        if self.quantity <= Decimal::ZERO {
            return Err(InvalidOrder::NonPositiveQuantity);
        }
        if self.price.normalize().scale() > MAX_DECIMAL_PLACES {
            return Err(InvalidOrder::PriceTooPrecise);
        }
        if self.quantity.normalize().scale() > MAX_DECIMAL_PLACES {
            return Err(InvalidOrder::QuantityTooPrecise);
        }
        Ok(())
    }
}

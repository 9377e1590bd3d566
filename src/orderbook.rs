use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    instrument::Pair,
    orders::Side,
    store::{ExchangeStore, StoreResult},
};

/// Ladders are truncated to this many distinct price levels per side.
pub const DEPTH_LEVELS: usize = 50;

/// One aggregated price level: the summed remaining quantity of every open
/// order resting at `price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Depth view of one pair's book, best price first on both sides (bids
/// descending, asks ascending).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub pair: Pair,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

/// Aggregate the store's open orders for `pair` into bid/ask ladders.
///
/// This recomputes from durable state on every call; it is correct as of the
/// read and nothing is cached. An empty book yields empty ladders, not an
/// error.
pub fn snapshot(store: &ExchangeStore, pair: &Pair) -> StoreResult<BookSnapshot> {
    let bids = store.depth(pair, Side::Buy, DEPTH_LEVELS)?;
    let asks = store.depth(pair, Side::Sell, DEPTH_LEVELS)?;
    Ok(BookSnapshot {
        pair: *pair,
        bids: bids.into_iter().map(level).collect(),
        asks: asks.into_iter().map(level).collect(),
    })
}

fn level((price, quantity): (Decimal, Decimal)) -> PriceLevel {
    PriceLevel { price, quantity }
}

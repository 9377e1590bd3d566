use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::SystemTime,
};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    instrument::Pair,
    orders::Side,
    state::MarketEvent,
    store::{ExchangeStore, StoreError},
    trade::Trade,
};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error during matching: {0}")]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Result of one match invocation. `trades_executed` is 0 or 1 for
/// [`MatchingEngine::match_once`]; the draining variant sums over its
/// iterations. `volume_matched` is quote volume, price × quantity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub trades_executed: u32,
    pub volume_matched: Decimal,
}

/// The crossing algorithm.
///
/// Each pair has its own lock, created on demand: two concurrent match calls
/// for the same pair serialize against each other, while different pairs
/// proceed independently. The lock is held from reading the best bid/ask
/// through the store commit, so the pair of orders a call decides to cross
/// cannot be consumed underneath it by a rival call. The commit itself is a
/// single atomic batch (see `ExchangeStore::commit_match`), so a storage
/// failure mid-match leaves no partial state behind.
pub struct MatchingEngine {
    store: Arc<ExchangeStore>,
    events: broadcast::Sender<MarketEvent>,
    pair_locks: Mutex<HashMap<Pair, Arc<Mutex<()>>>>,
}

impl MatchingEngine {
    pub fn new(store: Arc<ExchangeStore>, events: broadcast::Sender<MarketEvent>) -> Self {
        Self {
            store,
            events,
            pair_locks: Mutex::new(HashMap::new()),
        }
    }

    fn pair_lock(&self, pair: &Pair) -> Arc<Mutex<()>> {
        self.pair_locks
            .lock()
            .unwrap()
            .entry(*pair)
            .or_default()
            .clone()
    }

    /// Attempt exactly one crossing for `pair`.
    ///
    /// Reads the best open bid and ask; if either side is empty or the bid
    /// price is below the ask price there is nothing to do and the store is
    /// left untouched. Otherwise the trade executes at the resting ask's
    /// price for the smaller of the two remaining quantities, both orders
    /// are depleted (a side reaching zero becomes FILLED), and the trade is
    /// recorded — all in one commit.
    ///
    /// One invocation resolves at most one trade even if the book is still
    /// crossable afterwards; callers wanting a full sweep use
    /// [`Self::match_until_exhausted`].
    pub fn match_once(&self, pair: &Pair) -> EngineResult<MatchOutcome> {
        let lock = self.pair_lock(pair);
        let _guard = lock.lock().unwrap();

        let (Some(mut bid), Some(mut ask)) = (
            self.store.best_order(pair, Side::Buy)?,
            self.store.best_order(pair, Side::Sell)?,
        ) else {
            return Ok(MatchOutcome::default());
        };

        if bid.price < ask.price {
            debug!(%pair, bid = %bid.price, ask = %ask.price, "book not crossed");
            return Ok(MatchOutcome::default());
        }

        let quantity = bid.quantity.min(ask.quantity);
        let price = ask.price; // resting ask sets the execution price

        bid.apply_fill(quantity);
        ask.apply_fill(quantity);

        let trade = Trade {
            id: Uuid::new_v4(),
            pair: *pair,
            buy_order_id: bid.id,
            sell_order_id: ask.id,
            price,
            quantity,
            executed_at: SystemTime::now(),
        };

        self.store.commit_match(&trade, &bid, &ask)?;
        info!(%pair, %price, %quantity, "trade executed");

        let volume = trade.volume();
        let _ = self.events.send(MarketEvent::Trade(trade));
        let _ = self.events.send(MarketEvent::BookChanged(*pair));

        Ok(MatchOutcome {
            trades_executed: 1,
            volume_matched: volume,
        })
    }

    /// Repeat [`Self::match_once`] until the book stops crossing, summing
    /// executed trades and volume.
    pub fn match_until_exhausted(&self, pair: &Pair) -> EngineResult<MatchOutcome> {
        let mut total = MatchOutcome::default();
        loop {
            let outcome = self.match_once(pair)?;
            if outcome.trades_executed == 0 {
                return Ok(total);
            }
            total.trades_executed += outcome.trades_executed;
            total.volume_matched += outcome.volume_matched;
        }
    }
}

use std::{path::Path, sync::Arc};

use tokio::sync::broadcast;

use crate::{
    engine::MatchingEngine,
    instrument::Pair,
    store::{ExchangeStore, StoreResult},
    trade::Trade,
};

/// Feed of market activity consumed by websocket subscribers. Senders never
/// block on it; events are dropped when nobody listens.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    /// The set of open orders for a pair changed (new order or a fill).
    BookChanged(Pair),
    /// A trade was executed.
    Trade(Trade),
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ExchangeStore>,
    pub engine: Arc<MatchingEngine>,
    pub events: broadcast::Sender<MarketEvent>,
}

impl AppState {
    pub fn new(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let store = Arc::new(ExchangeStore::open(db_path)?);
        let (events, _) = broadcast::channel(256);
        let engine = Arc::new(MatchingEngine::new(store.clone(), events.clone()));
        Ok(Self {
            store,
            engine,
            events,
        })
    }
}

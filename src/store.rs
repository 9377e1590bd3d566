use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use bincode::{
    config,
    error::{DecodeError, EncodeError},
};
use parity_db::{BTreeIterator, ColId, Db, Options};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{self};
use std::{
    collections::BTreeMap,
    path::Path,
    sync::Mutex,
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    instrument::Pair,
    orders::{MAX_DECIMAL_PLACES, NewOrder, Order, OrderStatus, Side},
    trade::Trade,
    wallet::WalletBalance,
};

/// Orders by id.
const COL_ORDERS: ColId = 0;
/// Open-order book index: one entry per OPEN order, keyed so that an
/// ascending scan walks one side of one pair in price-time priority.
const COL_BOOK: ColId = 1;
/// Trades by id. Append-only.
const COL_TRADES: ColId = 2;
/// Trade ledger index per pair in execution-time order, for paging.
const COL_TRADE_LOG: ColId = 3;
/// Wallet balances keyed by (user, currency).
const COL_WALLETS: ColId = 4;

const NUM_COLUMNS: u8 = 5;

/// Fixed-point scale factor for prices in index keys: 10^MAX_DECIMAL_PLACES.
const PRICE_SCALE: u64 = 10u64.pow(MAX_DECIMAL_PLACES);

//Cursor (opaque to clients)
#[derive(serde::Serialize, serde::Deserialize)]
struct Cursor {
    ts_nanos: u128,
    trade_id: Uuid,
}

/// Errors from the key/value store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ParityDB error: {0}")]
    Parity(#[from] parity_db::Error),
    #[error("Serialization/Deserialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Bincode encode error: {0}")]
    BincodeEncode(#[from] EncodeError),

    #[error("Bincode decode error: {0}")]
    BincodeDecode(#[from] DecodeError),

    #[error("Malformed id in store key: {0}")]
    MalformedId(#[from] uuid::Error),

    #[error("value not representable with 8 decimal places: {0}")]
    Unrepresentable(Decimal),

    #[error("Invalid cursor")]
    BadCursor,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// ParityDB-backed storage for orders, trades and wallet balances.
///
/// The order book itself is not kept in memory: the `COL_BOOK` column is a
/// B-tree index whose keys sort each (pair, side) partition in price-time
/// priority, so "best order", "all open orders" and "aggregated depth" are
/// all prefix scans. Index entries exist exactly for OPEN orders; matching
/// removes them in the same commit that fills the order.
pub struct ExchangeStore {
    db: Db,
    next_seq: AtomicU64,
    wallet_lock: Mutex<()>,
}

impl ExchangeStore {
    /// Open (or create) a ParityDB at `path`, with B-tree indices on the
    /// scan columns. The arrival-sequence counter resumes from the highest
    /// sequence still present in the book index, so price-time tie-breaks
    /// stay stable across restarts.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut opts = Options::with_columns(path.as_ref(), NUM_COLUMNS);
        for col in [COL_BOOK, COL_TRADE_LOG, COL_WALLETS] {
            opts.columns[col as usize].btree_index = true;
        }
        let db = Db::open_or_create(&opts)?;
        let last_seq = Self::max_book_seq(&db)?;
        Ok(ExchangeStore {
            db,
            next_seq: AtomicU64::new(last_seq),
            wallet_lock: Mutex::new(()),
        })
    }

    fn max_book_seq(db: &Db) -> StoreResult<u64> {
        let mut it: BTreeIterator<'_> = db.iter(COL_BOOK)?;
        it.seek_to_first()?;
        let mut max = 0u64;
        while let Some((key, _)) = it.next()? {
            if key.len() >= 8 {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&key[key.len() - 8..]);
                max = max.max(u64::from_be_bytes(buf));
            }
        }
        Ok(max)
    }

    #[inline]
    fn to_nanos(ts: SystemTime) -> u128 {
        ts.duration_since(UNIX_EPOCH).unwrap().as_nanos()
    }

    #[inline]
    fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(value, config::standard())?)
    }

    #[inline]
    fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
        let (value, _) = bincode::serde::decode_from_slice(bytes, config::standard())?;
        Ok(value)
    }

    /// Price scaled to integer 1e-8 units, for use inside index keys.
    fn scaled(value: Decimal) -> StoreResult<u64> {
        let scaled = value * Decimal::from(PRICE_SCALE);
        if !scaled.fract().is_zero() {
            return Err(StoreError::Unrepresentable(value));
        }
        scaled.to_u64().ok_or(StoreError::Unrepresentable(value))
    }

    #[inline]
    fn side_tag(side: Side) -> u8 {
        match side {
            Side::Buy => b'B',
            Side::Sell => b'A',
        }
    }

    #[inline]
    fn book_prefix(pair: &Pair, side: Side) -> Vec<u8> {
        let code = pair.code();
        let mut k = Vec::with_capacity(code.len() + 3);
        k.extend_from_slice(code.as_bytes());
        k.push(b':');
        k.push(Self::side_tag(side));
        k.push(b':');
        k
    }

    /// Full book-index key: prefix + sortable price + arrival sequence.
    ///
    /// Bid prices are bit-complemented so an ascending key scan yields
    /// descending prices; ask prices sort ascending as-is. The trailing
    /// sequence number gives FIFO order within a price level.
    fn book_key(order: &Order) -> StoreResult<Vec<u8>> {
        let scaled = Self::scaled(order.price)?;
        let ordered = match order.side {
            Side::Buy => !scaled,
            Side::Sell => scaled,
        };
        let mut key = Self::book_prefix(&order.pair, order.side);
        key.extend_from_slice(&ordered.to_be_bytes());
        key.extend_from_slice(&order.seq.to_be_bytes());
        Ok(key)
    }

    #[inline]
    fn trade_log_prefix(pair: &Pair) -> Vec<u8> {
        let code = pair.code();
        let mut k = Vec::with_capacity(code.len() + 1);
        k.extend_from_slice(code.as_bytes());
        k.push(b':');
        k
    }

    fn trade_log_key(trade: &Trade) -> Vec<u8> {
        let mut key = Self::trade_log_prefix(&trade.pair);
        key.extend_from_slice(&Self::to_nanos(trade.executed_at).to_be_bytes());
        key.extend_from_slice(trade.id.as_bytes());
        key
    }

    #[inline]
    fn wallet_prefix(user_id: Uuid) -> Vec<u8> {
        let mut k = Vec::with_capacity(17);
        k.extend_from_slice(user_id.as_bytes());
        k.push(b':');
        k
    }

    fn wallet_key(user_id: Uuid, currency: &str) -> Vec<u8> {
        let mut key = Self::wallet_prefix(user_id);
        key.extend_from_slice(currency.as_bytes());
        key
    }

    /// Persist a new OPEN order, assigning id, arrival sequence and creation
    /// timestamp. The order record and its book-index entry land in one
    /// commit.
    pub fn put_order(&self, new: &NewOrder) -> StoreResult<Order> {
        let order = Order {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            pair: new.pair,
            side: new.side,
            price: new.price,
            quantity: new.quantity,
            status: OrderStatus::Open,
            created_at: SystemTime::now(),
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst) + 1,
        };
        let book_key = Self::book_key(&order)?;
        self.db.commit(vec![
            (COL_ORDERS, order.id.as_bytes().to_vec(), Some(Self::encode(&order)?)),
            (COL_BOOK, book_key, Some(order.id.as_bytes().to_vec())),
        ])?;
        Ok(order)
    }

    pub fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        match self.db.get(COL_ORDERS, id.as_bytes())? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    fn order_at(&self, index_value: &[u8]) -> StoreResult<Option<Order>> {
        let id = Uuid::from_slice(index_value)?;
        self.get_order(id)
    }

    /// All OPEN orders for one side of one pair, in strict price-time
    /// priority: bids price-descending, asks price-ascending, equal prices
    /// by arrival sequence.
    pub fn open_orders(&self, pair: &Pair, side: Side) -> StoreResult<Vec<Order>> {
        let prefix = Self::book_prefix(pair, side);
        let mut it = self.db.iter(COL_BOOK)?;
        it.seek(&prefix)?;

        let mut orders = Vec::new();
        while let Some((key, value)) = it.next()? {
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(order) = self.order_at(&value)? {
                orders.push(order);
            }
        }
        Ok(orders)
    }

    /// The single best OPEN order for (pair, side) under the same ordering,
    /// or `None` for an empty side.
    pub fn best_order(&self, pair: &Pair, side: Side) -> StoreResult<Option<Order>> {
        let prefix = Self::book_prefix(pair, side);
        let mut it = self.db.iter(COL_BOOK)?;
        it.seek(&prefix)?;

        while let Some((key, value)) = it.next()? {
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(order) = self.order_at(&value)? {
                return Ok(Some(order));
            }
        }
        Ok(None)
    }

    /// Remaining quantity aggregated per price level, best price first,
    /// capped at `max_levels` distinct prices.
    pub fn depth(
        &self,
        pair: &Pair,
        side: Side,
        max_levels: usize,
    ) -> StoreResult<Vec<(Decimal, Decimal)>> {
        let prefix = Self::book_prefix(pair, side);
        let mut it = self.db.iter(COL_BOOK)?;
        it.seek(&prefix)?;

        let mut levels: Vec<(Decimal, Decimal)> = Vec::new();
        while let Some((key, value)) = it.next()? {
            if !key.starts_with(&prefix) {
                break;
            }
            let Some(order) = self.order_at(&value)? else {
                continue;
            };
            match levels.last_mut() {
                Some((price, total)) if *price == order.price => *total += order.quantity,
                _ => {
                    if levels.len() == max_levels {
                        break;
                    }
                    levels.push((order.price, order.quantity));
                }
            }
        }
        Ok(levels)
    }

    /// Persist the outcome of one crossing as a single atomic commit: both
    /// mutated orders, the new trade, its ledger entry, and removal of the
    /// book-index entry for any side that is no longer open. Either all of
    /// it becomes visible or none of it does.
    pub fn commit_match(&self, trade: &Trade, bid: &Order, ask: &Order) -> StoreResult<()> {
        let mut batch = vec![
            (COL_ORDERS, bid.id.as_bytes().to_vec(), Some(Self::encode(bid)?)),
            (COL_ORDERS, ask.id.as_bytes().to_vec(), Some(Self::encode(ask)?)),
            (COL_TRADES, trade.id.as_bytes().to_vec(), Some(Self::encode(trade)?)),
            (
                COL_TRADE_LOG,
                Self::trade_log_key(trade),
                Some(trade.id.as_bytes().to_vec()),
            ),
        ];
        for order in [bid, ask] {
            if !order.is_open() {
                batch.push((COL_BOOK, Self::book_key(order)?, None));
            }
        }
        self.db.commit(batch)?;
        Ok(())
    }

    pub fn trade(&self, id: Uuid) -> StoreResult<Option<Trade>> {
        match self.db.get(COL_TRADES, id.as_bytes())? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// All trades across all pairs, in per-pair execution order. For
    /// downstream reporting; the serving path uses `page_trades_asc`.
    pub fn trades(&self) -> StoreResult<Vec<Trade>> {
        let mut it = self.db.iter(COL_TRADE_LOG)?;
        it.seek_to_first()?;
        let mut out = Vec::new();
        while let Some((_key, value)) = it.next()? {
            let id = Uuid::from_slice(&value)?;
            if let Some(trade) = self.trade(id)? {
                out.push(trade);
            }
        }
        Ok(out)
    }

    #[inline]
    fn cursor_from_trade(t: &Trade) -> Cursor {
        Cursor {
            ts_nanos: Self::to_nanos(t.executed_at),
            trade_id: t.id,
        }
    }

    #[inline]
    fn encode_cursor(c: &Cursor) -> String {
        B64.encode(serde_json::to_vec(c).unwrap())
    }

    #[inline]
    fn decode_cursor(s: &str) -> StoreResult<Cursor> {
        let bytes = B64.decode(s).map_err(|_| StoreError::BadCursor)?;
        serde_json::from_slice(&bytes).map_err(|_| StoreError::BadCursor)
    }

    #[inline]
    fn key_from_cursor(pair: &Pair, c: &Cursor) -> Vec<u8> {
        let mut k = Self::trade_log_prefix(pair);
        k.extend_from_slice(&c.ts_nanos.to_be_bytes());
        k.extend_from_slice(c.trade_id.as_bytes());
        k
    }

    /// Page through a pair's trades in execution-time order. `after` is an
    /// opaque cursor from a previous page; it must name a trade that exists
    /// under this pair, so stale and cross-pair cursors are rejected.
    pub fn page_trades_asc(
        &self,
        pair: &Pair,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<(Vec<Trade>, Option<String>)> {
        let mut it: BTreeIterator<'_> = self.db.iter(COL_TRADE_LOG)?;
        let prefix = Self::trade_log_prefix(pair);

        let after_decoded = match after {
            None => None,
            Some(s) => Some(Self::decode_cursor(s)?),
        };
        if let Some(ref c) = after_decoded {
            let full = Self::key_from_cursor(pair, c);
            let mut check = self.db.iter(COL_TRADE_LOG)?;
            check.seek(&full)?;
            match check.next()? {
                Some((k, _)) if k == full => {}
                _ => return Err(StoreError::BadCursor),
            }
            // Start strictly after that exact key
            it.seek(&full)?;
            let _ = it.next()?; //consume the equal key
        } else {
            it.seek(&prefix)?;
        }

        let mut items = Vec::with_capacity(limit.min(256));
        let mut last_cursor: Option<String> = None;

        while items.len() < limit {
            match it.next()? {
                Some((k, v)) if k.starts_with(&prefix) => {
                    let id = Uuid::from_slice(&v)?;
                    let Some(trade) = self.trade(id)? else {
                        continue;
                    };
                    last_cursor = Some(Self::encode_cursor(&Self::cursor_from_trade(&trade)));
                    items.push(trade);
                }
                _ => break,
            }
        }

        Ok((items, last_cursor))
    }

    /// Add `amount` to the user's holding in `currency`, creating the entry
    /// if it does not exist, and return the new balance. This is the entry
    /// point for the out-of-core funding mechanism; the matching path never
    /// calls it.
    pub fn credit(&self, user_id: Uuid, currency: &str, amount: Decimal) -> StoreResult<Decimal> {
        let _guard = self.wallet_lock.lock().unwrap();
        let key = Self::wallet_key(user_id, currency);
        let current = match self.db.get(COL_WALLETS, &key)? {
            Some(raw) => Self::decode::<Decimal>(&raw)?,
            None => Decimal::ZERO,
        };
        let updated = current + amount;
        self.db
            .commit(vec![(COL_WALLETS, key, Some(Self::encode(&updated)?))])?;
        Ok(updated)
    }

    /// Every wallet entry the user holds.
    pub fn wallet_entries(&self, user_id: Uuid) -> StoreResult<Vec<WalletBalance>> {
        let prefix = Self::wallet_prefix(user_id);
        let mut it = self.db.iter(COL_WALLETS)?;
        it.seek(&prefix)?;

        let mut entries = Vec::new();
        while let Some((key, value)) = it.next()? {
            if !key.starts_with(&prefix) {
                break;
            }
            let currency = String::from_utf8(key[prefix.len()..].to_vec())?;
            entries.push(WalletBalance {
                user_id,
                currency,
                balance: Self::decode(&value)?,
            });
        }
        Ok(entries)
    }

    /// The user's holdings grouped by currency. Empty map for a user with no
    /// wallets; never an error.
    pub fn balances_for(&self, user_id: Uuid) -> StoreResult<BTreeMap<String, Decimal>> {
        Ok(self
            .wallet_entries(user_id)?
            .into_iter()
            .map(|w| (w.currency, w.balance))
            .collect())
    }
}

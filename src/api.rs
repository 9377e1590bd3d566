use std::collections::BTreeMap;

use axum::{
    Json, Router, debug_handler,
    extract::{
        FromRequest, Path, Query, Request, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use crate::{
    engine::{EngineError, MatchOutcome},
    instrument::Pair,
    orderbook::{self, BookSnapshot},
    orders::{InvalidOrder, NewOrder, Order},
    state::{AppState, MarketEvent},
    store::StoreError,
    trade::Trade,
};

/// Largest trade page a client can request; larger `limit` values are
/// clamped and the clamp is reported via the `x-effective-limit` header.
const MAX_TRADE_PAGE: usize = 1000;
const DEFAULT_TRADE_PAGE: usize = 100;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    UnprocessableEntity(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::UnprocessableEntity(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            ApiError::Internal(m) => {
                warn!("internal error: {}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<InvalidOrder> for ApiError {
    fn from(err: InvalidOrder) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::BadCursor => ApiError::BadRequest(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Like [`Json`], but logs malformed bodies and renders the rejection as the
/// usual `{"error": …}` shape instead of axum's plain-text 4xx.
pub struct LoggedJson<T>(pub T);

impl<S, T> FromRequest<S> for LoggedJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(LoggedJson(value)),
            Err(rejection) => {
                let text = rejection.body_text();
                warn!("rejected request body: {}", text);
                Err(ApiError::UnprocessableEntity(text))
            }
        }
    }
}

fn parse_pair(code: &str) -> Result<Pair, ApiError> {
    code.parse().map_err(ApiError::BadRequest)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user_id: Uuid,
    pub balances: BTreeMap<String, Decimal>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TradePage {
    pub items: Vec<Trade>,
    pub next: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TradeQuery {
    pub limit: Option<usize>,
    pub after: Option<String>,
}

/// Frames pushed over the `/ws/{pair}` market feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WsFrame {
    BookSnapshot(BookSnapshot),
    Trade(Trade),
}

#[debug_handler]
pub async fn create_order(
    State(state): State<AppState>,
    LoggedJson(new): LoggedJson<NewOrder>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    new.validate()?;
    let order = state.store.put_order(&new)?;
    let _ = state.events.send(MarketEvent::BookChanged(order.pair));
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn get_book(
    State(state): State<AppState>,
    Path(pair): Path<String>,
) -> Result<Json<BookSnapshot>, ApiError> {
    let pair = parse_pair(&pair)?;
    Ok(Json(orderbook::snapshot(&state.store, &pair)?))
}

pub async fn trigger_match(
    State(state): State<AppState>,
    Path(pair): Path<String>,
) -> Result<Json<MatchOutcome>, ApiError> {
    let pair = parse_pair(&pair)?;
    Ok(Json(state.engine.match_once(&pair)?))
}

pub async fn drain_match(
    State(state): State<AppState>,
    Path(pair): Path<String>,
) -> Result<Json<MatchOutcome>, ApiError> {
    let pair = parse_pair(&pair)?;
    Ok(Json(state.engine.match_until_exhausted(&pair)?))
}

pub async fn get_balances(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balances = state.store.balances_for(user_id)?;
    Ok(Json(BalanceResponse { user_id, balances }))
}

pub async fn get_trades(
    State(state): State<AppState>,
    Path(pair): Path<String>,
    Query(query): Query<TradeQuery>,
) -> Result<Response, ApiError> {
    let pair = parse_pair(&pair)?;
    let effective = query.limit.unwrap_or(DEFAULT_TRADE_PAGE).min(MAX_TRADE_PAGE);
    let (items, next) = state
        .store
        .page_trades_asc(&pair, query.after.as_deref(), effective)?;

    let mut res = Json(TradePage { items, next }).into_response();
    res.headers_mut().insert(
        "x-effective-limit",
        HeaderValue::from_str(&effective.to_string()).unwrap(),
    );
    Ok(res)
}

pub async fn ws_feed(
    State(state): State<AppState>,
    Path(pair): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let pair = parse_pair(&pair)?;
    Ok(ws.on_upgrade(move |socket| market_feed(state, pair, socket)))
}

/// Push an initial depth snapshot, then a fresh snapshot on every book
/// change and a trade frame per execution, until the client goes away.
async fn market_feed(state: AppState, pair: Pair, socket: WebSocket) {
    let (mut sink, _stream) = socket.split();
    let mut events = state.events.subscribe();

    if send_snapshot(&state, &pair, &mut sink).await.is_err() {
        return;
    }

    loop {
        match events.recv().await {
            Ok(MarketEvent::BookChanged(p)) if p == pair => {
                if send_snapshot(&state, &pair, &mut sink).await.is_err() {
                    break;
                }
            }
            Ok(MarketEvent::Trade(trade)) if trade.pair == pair => {
                if send_frame(&mut sink, &WsFrame::Trade(trade)).await.is_err() {
                    break;
                }
            }
            Ok(_) => {} // activity on another pair
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "websocket subscriber lagged, resyncing");
                if send_snapshot(&state, &pair, &mut sink).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn send_snapshot(
    state: &AppState,
    pair: &Pair,
    sink: &mut SplitSink<WebSocket, Message>,
) -> Result<(), ()> {
    match orderbook::snapshot(&state.store, pair) {
        Ok(snap) => send_frame(sink, &WsFrame::BookSnapshot(snap)).await,
        Err(err) => {
            warn!("failed to build snapshot for feed: {}", err);
            Err(())
        }
    }
}

async fn send_frame(
    sink: &mut SplitSink<WebSocket, Message>,
    frame: &WsFrame,
) -> Result<(), ()> {
    let Ok(text) = serde_json::to_string(frame) else {
        return Err(());
    };
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order))
        .route("/book/{pair}", get(get_book))
        .route("/match/{pair}", post(trigger_match))
        .route("/match/{pair}/drain", post(drain_match))
        .route("/balances/{user_id}", get(get_balances))
        .route("/trades/{pair}", get(get_trades))
        .route("/ws/{pair}", get(ws_feed))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

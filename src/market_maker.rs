use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMsg};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    api::WsFrame,
    errors::MarketMakerError,
    instrument::Pair,
};

const SPREAD: Decimal = dec!(0.5);
const QUOTE_QTY: Decimal = dec!(1);
/// Price used to seed quotes while the book is still empty.
const SEED_MID: Decimal = dec!(100);
const PACE_MS: u64 = 500; //requote every 500ms

/// Two-sided quoting demo against a running server.
///
/// Subscribes to the pair's websocket feed to track the mid-price, then on a
/// fixed pace posts a bid and an ask one half-spread either side of the mid
/// and pokes the match endpoint. With no book yet, quoting starts around a
/// seed price so the feed has something to report.
pub async fn run_market_maker(
    api_base: &str,
    pair: Pair,
    cancel: CancellationToken,
) -> Result<(), MarketMakerError> {
    // 1) Subscribe to the market feed
    let ws_base = api_base
        .replace("https://", "wss://")
        .replace("http://", "ws://");
    let (ws_stream, _) = connect_async(format!("{}/ws/{}", ws_base, pair))
        .await
        .map_err(|e| MarketMakerError::Connect(e.to_string()))?;
    let (_write, mut read) = ws_stream.split();

    //Track the latest mid-price via watch channel
    let (mid_tx, mid_rx) = watch::channel(None::<Decimal>);

    //Parse snapshots off the feed in the background
    tokio::spawn(async move {
        while let Some(Ok(msg)) = read.next().await {
            if let WsMsg::Text(txt) = msg {
                if let Ok(WsFrame::BookSnapshot(snap)) = serde_json::from_str::<WsFrame>(&txt) {
                    if let (Some(best_bid), Some(best_ask)) = (snap.bids.first(), snap.asks.first())
                    {
                        let mid = (best_bid.price + best_ask.price) / Decimal::TWO;
                        let _ = mid_tx.send(Some(mid));
                    }
                }
            }
        }
    });

    let client = Client::new();
    let maker = Uuid::new_v4();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("received shutdown, exiting market maker");
                break;
            }
            _ = tokio::time::sleep(Duration::from_millis(PACE_MS)) => {
                let mid = (*mid_rx.borrow()).unwrap_or(SEED_MID);
                for (side, price) in [("Buy", mid - SPREAD), ("Sell", mid + SPREAD)] {
                    client
                        .post(format!("{}/orders", api_base))
                        .json(&json!({
                            "user_id": maker,
                            "pair": pair.code(),
                            "side": side,
                            "price": price,
                            "quantity": QUOTE_QTY,
                        }))
                        .send()
                        .await?
                        .error_for_status()?;
                }
                client
                    .post(format!("{}/match/{}/drain", api_base, pair))
                    .send()
                    .await?
                    .error_for_status()?;
                tracing::info!(%pair, %mid, "quoted both sides");
            }
        }
    }
    Ok(())
}

//! Simulation harness: posts randomized limit orders against a running API
//! server and triggers matching after each arrival, so a local instance sees
//! realistic noisy flow.
//!
//! Arrival times are exponential (Poisson flow), order sizes are unit
//! exponentials scaled by `mean_qty` (heavy-tailed around the mean), and the
//! simulator's local mid-price drifts with Gaussian noise — each order lands
//! one spread away from the drifted mid on a random side, so the book both
//! builds depth and crosses.

use rand::Rng;
use rand_distr::{Distribution, Exp, Exp1, Normal};
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{engine::MatchOutcome, instrument::Pair};

#[derive(Clone)]
pub struct SimConfig {
    pub api_base: String,
    pub pair: Pair,
    /// Total duration in seconds; `None` runs until cancelled.
    pub run_secs: Option<u64>,
    /// Poisson arrival rate (λ) for incoming orders.
    pub order_rate_hz: f64,
    /// Std-dev of the Gaussian drift applied to the local mid-price.
    pub noise_sigma: f64,
    /// Average order size; actual sizes are Exp(1) × mean_qty.
    pub mean_qty: f64,
}

fn to_decimal(value: f64, floor: Decimal) -> Decimal {
    Decimal::try_from(value)
        .map(|d| d.round_dp(2))
        .unwrap_or(floor)
        .max(floor)
}

/// Drive randomized order flow against `cfg.api_base` until the duration
/// elapses or `cancel_token` fires (e.g. on ctrl-c). Each tick posts one
/// limit order and then drains the book via the match endpoint, printing a
/// running trade/volume tally.
pub async fn run_simulation(cfg: SimConfig, cancel_token: CancellationToken) -> anyhow::Result<()> {
    let client = Client::new();
    //1) Exponential inter-arrival times with rate = order_rate_hz
    let ia_dist = Exp::new(cfg.order_rate_hz).expect("order_rate_hz must be > 0");

    //2) Gaussian drift on the mid-price
    let drift = Normal::new(0.0, cfg.noise_sigma).expect("noise sigma >= 0");

    //3) unit exponential for sizing
    let size_dist = Exp1;

    let trader = Uuid::new_v4();
    let mut mid_price = 100.0f64;
    let mut trades = 0u32;
    let mut volume = Decimal::ZERO;
    let start = Instant::now();

    loop {
        //check overall time-limit
        if let Some(max_secs) = cfg.run_secs {
            if start.elapsed().as_secs() >= max_secs {
                break;
            }
        }
        //draw the next wait
        let wait_secs = ia_dist.sample(&mut rand::rng());
        let sleep_fut = sleep(Duration::from_secs_f64(wait_secs));
        tokio::select! {
            //user hits ctrl-c
            _ = cancel_token.cancelled() => {
                tracing::info!("received shutdown, exiting simulation");
                break;
            }
            _ = sleep_fut => {
                let raw: f64 = <Exp1 as Distribution<f64>>::sample(&size_dist, &mut rand::rng());
                let quantity = to_decimal(raw * cfg.mean_qty, dec!(0.01));
                //drift mid price, then quote one spread away on a random side
                mid_price += drift.sample(&mut rand::rng());
                let spread = 1.0;
                let (price, side) = if rand::rng().random_bool(0.5) {
                    (mid_price - spread, "Buy")
                } else {
                    (mid_price + spread, "Sell")
                };
                let price = to_decimal(price, dec!(0.01));

                client
                    .post(format!("{}/orders", cfg.api_base))
                    .json(&json!({
                        "user_id": trader,
                        "pair": cfg.pair.code(),
                        "side": side,
                        "price": price,
                        "quantity": quantity,
                    }))
                    .send()
                    .await?
                    .error_for_status()?;

                let outcome: MatchOutcome = client
                    .post(format!("{}/match/{}/drain", cfg.api_base, cfg.pair))
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await?;
                trades += outcome.trades_executed;
                volume += outcome.volume_matched;

                println!(
                    "[{:.1}s] side={} qty={} px={} mid={:.2} trades={} volume={}",
                    start.elapsed().as_secs_f64(),
                    side,
                    quantity,
                    price,
                    mid_price,
                    trades,
                    volume
                );
            }
        }
    }
    println!("--- done --- trades={} volume={}", trades, volume);
    Ok(())
}

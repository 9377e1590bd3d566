use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    api,
    instrument::Pair,
    market_maker, orderbook,
    simulate::{self, SimConfig},
    state::AppState,
};

/// CLI entry points for the exchange trading core
#[derive(Parser)]
#[command(name = "exchange-core")]
#[command(
    version = "0.1",
    about = "Spot exchange trading core: order store, depth view and matching engine"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WebSocket API server
    Serve {
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: String,
        #[arg(long, default_value = "exchange-db")]
        db: PathBuf,
    },
    /// Print the aggregated book for a pair
    Book {
        #[arg(long, default_value = "BTC-USDT")]
        pair: Pair,
        #[arg(long, default_value = "exchange-db")]
        db: PathBuf,
    },
    /// Trigger matching for a pair
    Match {
        #[arg(long, default_value = "BTC-USDT")]
        pair: Pair,
        /// Keep matching until the book stops crossing
        #[arg(long)]
        drain: bool,
        #[arg(long, default_value = "exchange-db")]
        db: PathBuf,
    },
    /// Fund a user's wallet. Balances are display-only: matching neither
    /// reserves nor settles them.
    Deposit {
        user: Uuid,
        currency: String,
        amount: Decimal,
        #[arg(long, default_value = "exchange-db")]
        db: PathBuf,
    },
    /// Show a user's balances per currency
    Balances {
        user: Uuid,
        #[arg(long, default_value = "exchange-db")]
        db: PathBuf,
    },
    /// Post randomized order flow against a running server
    Simulate {
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        api_base: String,
        #[arg(long, default_value = "BTC-USDT")]
        pair: Pair,
        #[arg(long)]
        run_secs: Option<u64>,
        #[arg(long, default_value_t = 5.0)]
        rate_hz: f64,
        #[arg(long, default_value_t = 0.5)]
        noise_sigma: f64,
        #[arg(long, default_value_t = 1.0)]
        mean_qty: f64,
    },
    /// Quote both sides of a pair against a running server
    MarketMaker {
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        api_base: String,
        #[arg(long, default_value = "BTC-USDT")]
        pair: Pair,
    },
}

//graceful shutdown token, cancelled on ctrl-c
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let tc = token.clone();
    tokio::spawn(async move {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl+C handler");
        tc.cancel();
    });
    token
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { addr, db } => {
            tracing_subscriber::fmt::init();
            let state = AppState::new(db)?;
            let app = api::router(state);
            let listener = TcpListener::bind(&addr).await?;
            tracing::info!("listening on {}", addr);
            let token = shutdown_token();
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await?;
        }
        Commands::Book { pair, db } => {
            let state = AppState::new(db)?;
            let snap = orderbook::snapshot(&state.store, &pair)?;
            println!("------ {} ------", pair);
            println!("Bids (highest first):");
            for level in &snap.bids {
                println!("  {} x {}", level.price, level.quantity);
            }
            println!("Asks (lowest first):");
            for level in &snap.asks {
                println!("  {} x {}", level.price, level.quantity);
            }
        }
        Commands::Match { pair, drain, db } => {
            let state = AppState::new(db)?;
            let outcome = if drain {
                state.engine.match_until_exhausted(&pair)?
            } else {
                state.engine.match_once(&pair)?
            };
            println!(
                "trades executed: {}, volume matched: {}",
                outcome.trades_executed, outcome.volume_matched
            );
        }
        Commands::Deposit {
            user,
            currency,
            amount,
            db,
        } => {
            let state = AppState::new(db)?;
            let balance = state.store.credit(user, &currency, amount)?;
            println!("{} {} balance: {}", user, currency, balance);
        }
        Commands::Balances { user, db } => {
            let state = AppState::new(db)?;
            let balances = state.store.balances_for(user)?;
            if balances.is_empty() {
                println!("no wallets for {}", user);
            }
            for (currency, balance) in balances {
                println!("{}: {}", currency, balance);
            }
        }
        Commands::Simulate {
            api_base,
            pair,
            run_secs,
            rate_hz,
            noise_sigma,
            mean_qty,
        } => {
            tracing_subscriber::fmt::init();
            simulate::run_simulation(
                SimConfig {
                    api_base,
                    pair,
                    run_secs,
                    order_rate_hz: rate_hz,
                    noise_sigma,
                    mean_qty,
                },
                shutdown_token(),
            )
            .await?;
        }
        Commands::MarketMaker { api_base, pair } => {
            tracing_subscriber::fmt::init();
            market_maker::run_market_maker(&api_base, pair, shutdown_token()).await?;
        }
    }
    Ok(())
}

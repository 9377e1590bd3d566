use thiserror::Error;

#[derive(Error, Debug)]
pub enum MarketMakerError {
    #[error("connection error: {0}")]
    Connect(String),
    #[error("quote request failed: {0}")]
    Quote(#[from] reqwest::Error),
}

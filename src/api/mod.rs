pub mod bitflyer;
pub mod paper;

pub use bitflyer::BitflyerClient;
pub use paper::PaperExchange;

use crate::models::{ExchangePosition, OrderSide};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("could not decode exchange response: {0}")]
    Decode(String),

    #[error("authentication unavailable: {0}")]
    Auth(String),
}

/// Account-level operations the control loop needs from an exchange
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Last traded price
    async fn get_price(&self) -> Result<f64, ExchangeError>;

    /// Net open position
    async fn get_position(&self) -> Result<ExchangePosition, ExchangeError>;

    /// Cancel every resting order for the product
    async fn cancel_all(&self) -> Result<(), ExchangeError>;

    /// Market order; returns the acceptance id, or `None` when the size is
    /// below the exchange's minimum lot and nothing was sent
    async fn make_order(&self, side: OrderSide, size: f64) -> Result<Option<String>, ExchangeError>;

    fn name(&self) -> &str;
}

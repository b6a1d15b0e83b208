use super::{Exchange, ExchangeError};
use crate::api::bitflyer::{truncate_lot, MIN_LOT};
use crate::models::{ExchangePosition, OrderSide};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

/// One simulated market fill
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub id: String,
    pub side: OrderSide,
    pub size: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct PaperState {
    price: Option<f64>,
    net: f64,
    avg_entry: f64,
    realized_pnl: f64,
    fills: Vec<Fill>,
    cancel_calls: usize,
}

/// In-memory exchange filling market orders at the last known price
///
/// With a price feed attached, `get_price` reads the live feed (dry-run);
/// otherwise prices are pushed in with `set_price` (tests, replay).
pub struct PaperExchange {
    state: Mutex<PaperState>,
    price_feed: Option<Arc<dyn Exchange>>,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PaperState::default()),
            price_feed: None,
        }
    }

    pub fn with_price_feed(feed: Arc<dyn Exchange>) -> Self {
        Self {
            state: Mutex::new(PaperState::default()),
            price_feed: Some(feed),
        }
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_price(&self, price: f64) {
        self.state().price = Some(price);
    }

    pub fn net_position(&self) -> f64 {
        self.state().net
    }

    pub fn fills(&self) -> Vec<Fill> {
        self.state().fills.clone()
    }

    pub fn cancel_calls(&self) -> usize {
        self.state().cancel_calls
    }

    pub fn realized_pnl(&self) -> f64 {
        self.state().realized_pnl
    }

    /// Mark-to-market PnL of the open position at the last price
    pub fn unrealized_pnl(&self) -> f64 {
        let state = self.state();
        match state.price {
            Some(price) if state.net != 0.0 => (price - state.avg_entry) * state.net,
            _ => 0.0,
        }
    }
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl PaperState {
    /// Average-price accounting for a signed fill
    fn apply_fill(&mut self, quantity: f64, price: f64) {
        let same_direction = self.net == 0.0 || self.net.signum() == quantity.signum();

        if same_direction {
            let total = self.net.abs() + quantity.abs();
            self.avg_entry = (self.avg_entry * self.net.abs() + price * quantity.abs()) / total;
            self.net += quantity;
            return;
        }

        let closed = quantity.abs().min(self.net.abs());
        self.realized_pnl += closed * (price - self.avg_entry) * self.net.signum();
        let previous = self.net;
        self.net = truncate_lot(self.net + quantity);

        if self.net == 0.0 {
            self.avg_entry = 0.0;
        } else if self.net.signum() != previous.signum() {
            self.avg_entry = price;
        }
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn get_price(&self) -> Result<f64, ExchangeError> {
        if let Some(feed) = &self.price_feed {
            let price = feed.get_price().await?;
            self.set_price(price);
            return Ok(price);
        }

        self.state().price.ok_or_else(|| ExchangeError::Api {
            status: 503,
            message: "paper exchange has no price yet".to_string(),
        })
    }

    async fn get_position(&self) -> Result<ExchangePosition, ExchangeError> {
        Ok(ExchangePosition::from_signed(self.state().net))
    }

    async fn cancel_all(&self) -> Result<(), ExchangeError> {
        self.state().cancel_calls += 1;
        Ok(())
    }

    async fn make_order(&self, side: OrderSide, size: f64) -> Result<Option<String>, ExchangeError> {
        let size = truncate_lot(size.abs());
        if size < MIN_LOT {
            return Ok(None);
        }

        let mut state = self.state();
        let price = state.price.ok_or_else(|| ExchangeError::Api {
            status: 503,
            message: "cannot fill without a price".to_string(),
        })?;

        let quantity = match side {
            OrderSide::Buy => size,
            OrderSide::Sell => -size,
        };
        state.apply_fill(quantity, price);

        let id = format!("PAPER-{}", uuid::Uuid::new_v4());
        state.fills.push(Fill {
            id: id.clone(),
            side,
            size,
            price,
            timestamp: Utc::now(),
        });

        tracing::info!(side = %side, size, price, net = state.net, "📝 Paper fill");
        Ok(Some(id))
    }

    fn name(&self) -> &str {
        "paper"
    }
}

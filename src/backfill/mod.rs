pub mod validator;

pub use validator::{HistoryValidator, ValidationError};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::BootstrapSettings;
use crate::execution::price_history::{HistoryError, PriceHistory};
use crate::models::PriceObservation;
use crate::Result;

/// Store of past prices used to seed the history at startup
#[async_trait]
pub trait HistoricalSource: Send + Sync {
    /// Observations from the last `minutes` minutes, oldest first
    async fn fetch_recent(&self, instrument: &str, minutes: u32) -> Result<Vec<PriceObservation>>;
}

/// Why bootstrap fell back to gradual accumulation
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    Disabled,
    NoSource,
    Timeout,
    SourceError(String),
    Invalid(ValidationError),
    SeedRejected(HistoryError),
}

impl std::fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FallbackReason::Disabled => write!(f, "historical backfill disabled"),
            FallbackReason::NoSource => write!(f, "no historical source configured"),
            FallbackReason::Timeout => write!(f, "historical fetch timed out"),
            FallbackReason::SourceError(e) => write!(f, "historical source failed: {}", e),
            FallbackReason::Invalid(e) => write!(f, "historical data rejected: {}", e),
            FallbackReason::SeedRejected(e) => write!(f, "seed rejected: {}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BootstrapOutcome {
    /// History seeded, model ready immediately
    Seeded { count: usize },
    /// History left as is; readiness comes from live ticks
    Gradual { reason: FallbackReason },
}

impl BootstrapOutcome {
    pub fn is_seeded(&self) -> bool {
        matches!(self, BootstrapOutcome::Seeded { .. })
    }
}

/// One-shot historical backfill with gradual accumulation as fallback
///
/// Nothing here is fatal: every failure leaves the history untouched and
/// is reported as `BootstrapOutcome::Gradual`.
pub struct BootstrapInitializer {
    source: Option<Arc<dyn HistoricalSource>>,
    instrument: String,
    settings: BootstrapSettings,
    warmup: usize,
}

impl BootstrapInitializer {
    pub fn new(
        source: Option<Arc<dyn HistoricalSource>>,
        instrument: impl Into<String>,
        settings: BootstrapSettings,
        warmup: usize,
    ) -> Self {
        Self {
            source,
            instrument: instrument.into(),
            settings,
            warmup,
        }
    }

    /// Minutes requested from the source: indicator warmup plus `k`, with margin
    pub fn fetch_minutes(&self, k: usize) -> u32 {
        ((k + self.warmup) as f64 * self.settings.fetch_margin).ceil() as u32
    }

    pub async fn initialize(&self, history: &mut PriceHistory) -> BootstrapOutcome {
        self.initialize_at(history, Utc::now()).await
    }

    /// Run bootstrap treating `now` as the current time
    pub async fn initialize_at(
        &self,
        history: &mut PriceHistory,
        now: DateTime<Utc>,
    ) -> BootstrapOutcome {
        match self.try_seed(history, now).await {
            Ok(count) => {
                tracing::info!(
                    instrument = %self.instrument,
                    count,
                    ready = history.is_ready(),
                    "✅ Price history seeded from historical data"
                );
                BootstrapOutcome::Seeded { count }
            }
            Err(reason) => {
                tracing::warn!(
                    event = "bootstrap_fallback",
                    instrument = %self.instrument,
                    reason = %reason,
                    need = history.k(),
                    "⚠️  Historical backfill unavailable, accumulating live prices"
                );
                BootstrapOutcome::Gradual { reason }
            }
        }
    }

    async fn try_seed(
        &self,
        history: &mut PriceHistory,
        now: DateTime<Utc>,
    ) -> std::result::Result<usize, FallbackReason> {
        if !self.settings.enabled {
            return Err(FallbackReason::Disabled);
        }
        let source = self.source.as_ref().ok_or(FallbackReason::NoSource)?;

        let minutes = self.fetch_minutes(history.k());
        tracing::info!(
            instrument = %self.instrument,
            minutes,
            "📥 Fetching historical prices"
        );

        let observations = tokio::time::timeout(
            self.settings.timeout(),
            source.fetch_recent(&self.instrument, minutes),
        )
        .await
        .map_err(|_| FallbackReason::Timeout)?
        .map_err(|e| FallbackReason::SourceError(e.to_string()))?;

        HistoryValidator::new(history.k(), self.settings.max_gap_secs, self.settings.max_price_ratio)
            .validate(&observations, now)
            .map_err(FallbackReason::Invalid)?;

        history.seed(&observations).map_err(FallbackReason::SeedRejected)
    }
}

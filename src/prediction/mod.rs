// Up/down probability sources
pub mod backend;
pub mod features;

pub use backend::{InferenceBackend, LinearBackend, LinearWeights, ModelLoadError};
pub use features::{build_features, FeatureRow, FEATURE_DIM};

use crate::config::{ConfigError, MissingModelPolicy, ModelSettings};
use crate::indicators::IndicatorConfig;
use crate::models::{PriceObservation, Side};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Why no probability could be produced this tick
///
/// Every variant is handled by the caller as a no-signal tick.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictionUnavailable {
    #[error("no prediction model configured")]
    NotConfigured,

    #[error("window has {have} observations, model needs {need}")]
    InsufficientWindow { have: usize, need: usize },

    #[error("feature construction failed: {0}")]
    Features(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("inference returned invalid output: {0}")]
    InvalidOutput(String),

    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("previous inference still running")]
    Busy,

    #[error("inference panicked: {0}")]
    Panicked(String),
}

/// Indicator features fed through an inference backend
#[derive(Clone)]
pub struct TechnicalModel {
    backend: Arc<dyn InferenceBackend>,
    indicators: IndicatorConfig,
    up_class_index: usize,
    /// Set while a blocking inference is running, including after a timeout
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag when the blocking inference finishes or is dropped
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl TechnicalModel {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        indicators: IndicatorConfig,
        up_class_index: usize,
    ) -> Self {
        Self {
            backend,
            indicators,
            up_class_index: up_class_index.min(1),
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    fn predict(&self, window: &[PriceObservation], k: usize) -> Result<f64, PredictionUnavailable> {
        if window.len() < k {
            return Err(PredictionUnavailable::InsufficientWindow {
                have: window.len(),
                need: k,
            });
        }

        let prices: Vec<f64> = window.iter().map(|o| o.price).collect();
        let features = build_features(&prices, k, &self.indicators)
            .map_err(PredictionUnavailable::Features)?;

        let output = self
            .backend
            .infer(&features)
            .map_err(PredictionUnavailable::Inference)?;

        if output.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(PredictionUnavailable::InvalidOutput(format!("{:?}", output)));
        }

        Ok(output[self.up_class_index].clamp(0.0, 1.0))
    }
}

/// Source of the per-tick up probability, chosen once at startup
#[derive(Clone)]
pub enum PredictionSource {
    TechnicalModel(TechnicalModel),
    /// No model configured: every call fails with `NotConfigured`
    Unavailable,
}

impl PredictionSource {
    /// Select the source from configuration, applying the missing-model policy
    pub fn from_settings(settings: &ModelSettings) -> Result<Self, ConfigError> {
        let loaded = match &settings.model_path {
            Some(path) => LinearBackend::load(path).map_err(|e| e.to_string()),
            None => Err("no model_path configured".to_string()),
        }
        .and_then(|backend| {
            if backend.k() == settings.k {
                Ok(backend)
            } else {
                Err(format!(
                    "model weights expect k={}, configured k={}",
                    backend.k(),
                    settings.k
                ))
            }
        });

        match (loaded, settings.on_missing_model) {
            (Ok(backend), _) => {
                Ok(Self::TechnicalModel(TechnicalModel::new(
                    Arc::new(backend),
                    settings.indicators.clone(),
                    settings.up_class_index,
                )))
            }
            (Err(reason), MissingModelPolicy::FailFast) => Err(ConfigError::ModelRequired(reason)),
            (Err(reason), MissingModelPolicy::NoSignal) => {
                tracing::warn!(
                    event = "prediction_unavailable",
                    reason = %reason,
                    "Starting without a prediction model; every tick will be no-signal"
                );
                Ok(Self::Unavailable)
            }
        }
    }

    /// Probability that the price goes up over the holding horizon
    ///
    /// Panics inside feature construction or inference are caught here.
    pub fn predict_up_probability(
        &self,
        window: &[PriceObservation],
        k: usize,
    ) -> Result<f64, PredictionUnavailable> {
        match self {
            Self::Unavailable => Err(PredictionUnavailable::NotConfigured),
            Self::TechnicalModel(model) => {
                catch_unwind(AssertUnwindSafe(|| model.predict(window, k)))
                    .unwrap_or_else(|payload| Err(PredictionUnavailable::Panicked(panic_message(&*payload))))
            }
        }
    }

    /// Run the prediction on a blocking thread, bounded by `timeout`
    ///
    /// On timeout the inference thread is left to finish on its own and its
    /// result is discarded. At most one inference runs at a time: while a
    /// timed-out one is still running, calls fail with `Busy`.
    pub async fn predict_with_timeout(
        &self,
        window: Vec<PriceObservation>,
        k: usize,
        timeout: Duration,
    ) -> Result<f64, PredictionUnavailable> {
        let model = match self {
            Self::Unavailable => return Err(PredictionUnavailable::NotConfigured),
            Self::TechnicalModel(model) => model,
        };

        if model.in_flight.swap(true, Ordering::AcqRel) {
            return Err(PredictionUnavailable::Busy);
        }
        let guard = InFlightGuard(Arc::clone(&model.in_flight));

        let source = self.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            source.predict_up_probability(&window, k)
        });

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(PredictionUnavailable::Panicked(join_error.to_string())),
            Err(_) => Err(PredictionUnavailable::Timeout(timeout)),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::TechnicalModel(_))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::TechnicalModel(model) => model.backend_name(),
            Self::Unavailable => "unavailable",
        }
    }
}

/// Map an up probability onto a direction, with a dead band of `margin`
pub fn predicted_side(up_probability: f64, margin: f64) -> Side {
    if up_probability > 0.5 + margin {
        Side::Long
    } else if up_probability < 0.5 - margin {
        Side::Short
    } else {
        Side::Flat
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

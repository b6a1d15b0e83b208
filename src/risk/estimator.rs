use crate::config::SizingSettings;
use crate::models::PriceObservation;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    #[error("risk needs at least 2 observations, got {have}")]
    InsufficientWindow { have: usize },
}

/// Volatility of the trailing price window
///
/// Risk is the sample standard deviation (n - 1) of the last `lookback`
/// prices, so a window with higher sample variance always scores at least as
/// high as a calmer window of the same length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskEstimator {
    lookback: usize,
}

impl RiskEstimator {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback: lookback.max(2),
        }
    }

    pub fn lookback(&self) -> usize {
        self.lookback
    }

    pub fn estimate(&self, window: &[PriceObservation]) -> Result<f64, RiskError> {
        let prices: Vec<f64> = window.iter().map(|o| o.price).collect();
        self.estimate_prices(&prices)
    }

    pub fn estimate_prices(&self, prices: &[f64]) -> Result<f64, RiskError> {
        let recent = &prices[prices.len().saturating_sub(self.lookback)..];
        if recent.len() < 2 {
            return Err(RiskError::InsufficientWindow { have: recent.len() });
        }

        let n = recent.len() as f64;
        let mean = recent.iter().sum::<f64>() / n;
        let variance = recent.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / (n - 1.0);

        Ok(variance.sqrt())
    }
}

/// Converts a risk metric into an order size
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSizer {
    pub base_size: f64,
    pub risk_floor: f64,
    pub min_size: f64,
    pub max_size: f64,
}

impl PositionSizer {
    pub fn from_settings(settings: &SizingSettings) -> Self {
        Self {
            base_size: settings.base_size,
            risk_floor: settings.risk_floor,
            min_size: settings.min_size,
            max_size: settings.max_size,
        }
    }

    /// `base_size / max(risk, risk_floor)`, clamped to `[min_size, max_size]`
    pub fn size_for(&self, risk: f64) -> f64 {
        let raw = self.base_size / risk.max(self.risk_floor);
        raw.clamp(self.min_size, self.max_size)
    }
}

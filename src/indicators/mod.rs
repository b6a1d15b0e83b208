// Technical indicators used to build model features
// Scalar functions return the latest value; `_series` variants return one
// entry per input price, `None` while the indicator is still warming up

pub mod bollinger;
pub mod macd;
pub mod moving_average;
pub mod rsi;

pub use bollinger::{bollinger_series, BollingerBand};
pub use macd::{macd_series, MacdPoint};
pub use moving_average::{calculate_ema, calculate_sma, ema_series, sma_series};
pub use rsi::{calculate_rsi, rsi_series};

use serde::{Deserialize, Serialize};

/// Indicator windows shared by feature construction and warm-up sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub sma_short: usize,
    pub sma_mid: usize,
    pub sma_long: usize,
    pub bollinger_window: usize,
    pub bollinger_sigma: f64,
    pub macd_short: usize,
    pub macd_long: usize,
    pub macd_signal: usize,
    pub rsi_window: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            sma_short: 5,
            sma_mid: 20,
            sma_long: 60,
            bollinger_window: 20,
            bollinger_sigma: 2.0,
            macd_short: 12,
            macd_long: 26,
            macd_signal: 9,
            rsi_window: 14,
        }
    }
}

impl IndicatorConfig {
    /// Index of the first price at which every indicator is defined
    pub fn warmup_len(&self) -> usize {
        let sma_start = self.sma_short.max(self.sma_mid).max(self.sma_long) - 1;
        let bollinger_start = self.bollinger_window - 1;
        let macd_start = self.macd_long - 1 + self.macd_signal - 1;
        let rsi_start = self.rsi_window;

        sma_start
            .max(bollinger_start)
            .max(macd_start)
            .max(rsi_start)
    }

    pub fn validate(&self) -> Result<(), String> {
        let windows = [
            ("sma_short", self.sma_short),
            ("sma_mid", self.sma_mid),
            ("sma_long", self.sma_long),
            ("bollinger_window", self.bollinger_window),
            ("macd_short", self.macd_short),
            ("macd_long", self.macd_long),
            ("macd_signal", self.macd_signal),
            ("rsi_window", self.rsi_window),
        ];
        for (name, window) in windows {
            if window == 0 {
                return Err(format!("{} must be positive", name));
            }
        }
        if self.macd_short >= self.macd_long {
            return Err("macd_short must be shorter than macd_long".to_string());
        }
        if self.bollinger_sigma <= 0.0 {
            return Err("bollinger_sigma must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_warmup_len() {
        // SMA(60) dominates: 60 - 1
        assert_eq!(IndicatorConfig::default().warmup_len(), 59);
    }

    #[test]
    fn test_warmup_len_macd_dominates() {
        let config = IndicatorConfig {
            sma_long: 20,
            ..Default::default()
        };
        // 26 - 1 + 9 - 1
        assert_eq!(config.warmup_len(), 33);
    }

    #[test]
    fn test_validate_rejects_inverted_macd() {
        let config = IndicatorConfig {
            macd_short: 30,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

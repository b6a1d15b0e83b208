//! Runtime configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional TOML
//! file, then `FXTRADER__SECTION__KEY` environment variables. Exchange
//! credentials are read separately from `BITFLYER_API_KEY` /
//! `BITFLYER_API_SECRET` so they never end up in a config file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::indicators::IndicatorConfig;

/// Fatal configuration problems, only ever raised at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("prediction model unavailable under fail-fast policy: {0}")]
    ModelRequired(String),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// What to do when no usable prediction model is available at startup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingModelPolicy {
    /// Refuse to start
    FailFast,
    /// Start anyway; every tick is a no-signal tick
    NoSignal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: ModelSettings,
    pub sizing: SizingSettings,
    pub bootstrap: BootstrapSettings,
    pub exchange: ExchangeSettings,
    pub store: StoreSettings,
    #[serde(rename = "loop")]
    pub control: LoopSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Required input window length (minutes)
    pub k: usize,
    /// Holding horizon (minutes), also the hold_count reset value
    pub p: u32,
    /// Dead band around 0.5 inside which a prediction is "no signal"
    pub margin: f64,
    /// JSON weights artifact for the technical model
    pub model_path: Option<PathBuf>,
    /// Output class holding the "up" probability
    pub up_class_index: usize,
    pub on_missing_model: MissingModelPolicy,
    pub inference_timeout_ms: u64,
    pub indicators: IndicatorConfig,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            k: 90,
            p: 30,
            margin: 0.0,
            model_path: Some(PathBuf::from("models/technical_model.json")),
            up_class_index: 1,
            on_missing_model: MissingModelPolicy::FailFast,
            inference_timeout_ms: 2_000,
            indicators: IndicatorConfig::default(),
        }
    }
}

impl ModelSettings {
    pub fn inference_timeout(&self) -> Duration {
        Duration::from_millis(self.inference_timeout_ms)
    }

    /// Observations retained by the price history: the model window plus
    /// enough warm-up for every indicator to be defined over that window
    pub fn retention(&self, risk_lookback: usize) -> usize {
        (self.k + self.indicators.warmup_len()).max(risk_lookback)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingSettings {
    /// Size numerator: size = base_size / max(risk, risk_floor)
    pub base_size: f64,
    pub min_size: f64,
    pub max_size: f64,
    pub risk_floor: f64,
    /// Skip opening new exposure while risk is below this value
    pub min_risk_to_open: Option<f64>,
    /// Trailing observations used for the risk metric
    pub risk_lookback: usize,
    /// Mature early once the move in favour exceeds this many entry-risk units
    pub take_profit_std: Option<f64>,
    /// Mature early once the adverse move exceeds this many entry-risk units
    pub stop_loss_std: Option<f64>,
}

impl Default for SizingSettings {
    fn default() -> Self {
        Self {
            base_size: 1.0,
            min_size: 0.001,
            max_size: 0.01,
            risk_floor: 100.0,
            min_risk_to_open: None,
            risk_lookback: 90,
            take_profit_std: None,
            stop_loss_std: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapSettings {
    pub enabled: bool,
    pub timeout_ms: u64,
    /// Largest tolerated spacing between consecutive historical points
    pub max_gap_secs: u64,
    /// Over-fetch factor applied to the required minutes
    pub fetch_margin: f64,
    /// Largest tolerated max/min price ratio inside the fetched window
    pub max_price_ratio: f64,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_ms: 5_000,
            max_gap_secs: 180,
            fetch_margin: 1.2,
            max_price_ratio: 2.0,
        }
    }
}

impl BootstrapSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeSettings {
    pub api_url: String,
    pub product_code: String,
    /// Route orders to the in-memory paper exchange
    pub dry_run: bool,
    /// Deltas below this are not worth an order
    pub min_order_size: f64,
    pub requests_per_minute: u32,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.bitflyer.com".to_string(),
            product_code: "FX_BTC_JPY".to_string(),
            dry_run: true,
            min_order_size: 0.001,
            requests_per_minute: 120,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Redis holding recorded prices; `None` disables backfill and recording
    pub redis_url: Option<String>,
    pub instrument: String,
    pub record_prices: bool,
    pub keep_hours: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            redis_url: Some("redis://127.0.0.1:6379".to_string()),
            instrument: "bitflyer-FX".to_string(),
            record_prices: true,
            keep_hours: 48,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    pub tick_interval_secs: u64,
    /// Start ticking on the next wall-clock minute
    pub align_to_minute: bool,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            align_to_minute: true,
        }
    }
}

impl LoopSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model: ModelSettings::default(),
            sizing: SizingSettings::default(),
            bootstrap: BootstrapSettings::default(),
            exchange: ExchangeSettings::default(),
            store: StoreSettings::default(),
            control: LoopSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus environment, then validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }

        let settings: Settings = builder
            .add_source(
                ::config::Environment::with_prefix("FXTRADER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let model = &self.model;
        if model.k == 0 {
            return Err(invalid("model.k", "must be positive"));
        }
        if model.p == 0 {
            return Err(invalid("model.p", "must be positive"));
        }
        if !(0.0..0.5).contains(&model.margin) {
            return Err(invalid(
                "model.margin",
                format!("{} is outside [0, 0.5)", model.margin),
            ));
        }
        if model.up_class_index > 1 {
            return Err(invalid("model.up_class_index", "must be 0 or 1"));
        }
        if model.inference_timeout_ms == 0 {
            return Err(invalid("model.inference_timeout_ms", "must be positive"));
        }
        model
            .indicators
            .validate()
            .map_err(|reason| invalid("model.indicators", reason))?;

        let sizing = &self.sizing;
        if sizing.base_size <= 0.0 {
            return Err(invalid("sizing.base_size", "must be positive"));
        }
        if sizing.min_size <= 0.0 {
            return Err(invalid("sizing.min_size", "must be positive"));
        }
        if sizing.min_size > sizing.max_size {
            return Err(invalid(
                "sizing.max_size",
                format!("{} is below min_size {}", sizing.max_size, sizing.min_size),
            ));
        }
        if sizing.risk_floor <= 0.0 {
            return Err(invalid("sizing.risk_floor", "must be positive"));
        }
        if sizing.risk_lookback < 2 {
            return Err(invalid("sizing.risk_lookback", "needs at least 2 observations"));
        }
        for (field, band) in [
            ("sizing.take_profit_std", sizing.take_profit_std),
            ("sizing.stop_loss_std", sizing.stop_loss_std),
            ("sizing.min_risk_to_open", sizing.min_risk_to_open),
        ] {
            if let Some(value) = band {
                if value <= 0.0 {
                    return Err(invalid(field, "must be positive when set"));
                }
            }
        }

        let bootstrap = &self.bootstrap;
        if bootstrap.timeout_ms == 0 {
            return Err(invalid("bootstrap.timeout_ms", "must be positive"));
        }
        if bootstrap.max_gap_secs == 0 {
            return Err(invalid("bootstrap.max_gap_secs", "must be positive"));
        }
        if bootstrap.fetch_margin < 1.0 {
            return Err(invalid("bootstrap.fetch_margin", "must be at least 1.0"));
        }
        if bootstrap.max_price_ratio <= 1.0 {
            return Err(invalid("bootstrap.max_price_ratio", "must be above 1.0"));
        }

        if self.exchange.min_order_size <= 0.0 {
            return Err(invalid("exchange.min_order_size", "must be positive"));
        }
        if self.exchange.requests_per_minute == 0 {
            return Err(invalid("exchange.requests_per_minute", "must be positive"));
        }
        if self.control.tick_interval_secs == 0 {
            return Err(invalid("loop.tick_interval_secs", "must be positive"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.model.k, 90);
        assert_eq!(settings.model.p, 30);
        assert_eq!(settings.model.on_missing_model, MissingModelPolicy::FailFast);
    }

    #[test]
    fn test_zero_k_rejected() {
        let mut settings = Settings::default();
        settings.model.k = 0;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("model.k"));
    }

    #[test]
    fn test_margin_out_of_range_rejected() {
        let mut settings = Settings::default();
        settings.model.margin = 0.5;
        assert!(settings.validate().is_err());
        settings.model.margin = -0.1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_size_bounds_rejected() {
        let mut settings = Settings::default();
        settings.sizing.min_size = 0.1;
        settings.sizing.max_size = 0.01;
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("sizing.max_size"));
    }

    #[test]
    fn test_retention_covers_warmup_and_lookback() {
        let settings = Settings::default();
        let warmup = settings.model.indicators.warmup_len();
        assert_eq!(warmup, 59);
        assert_eq!(settings.model.retention(90), 90 + 59);
        assert_eq!(settings.model.retention(500), 500);
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = std::env::temp_dir().join(format!("fxtrader-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fxtrader.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[model]\nk = 120\np = 45\nmargin = 0.1\non_missing_model = \"no_signal\"\n\n[sizing]\nmin_risk_to_open = 50.0\n"
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.model.k, 120);
        assert_eq!(settings.model.p, 45);
        assert_eq!(settings.model.margin, 0.1);
        assert_eq!(settings.model.on_missing_model, MissingModelPolicy::NoSignal);
        assert_eq!(settings.sizing.min_risk_to_open, Some(50.0));
        // Untouched sections keep their defaults
        assert_eq!(settings.bootstrap.fetch_margin, 1.2);

        std::fs::remove_dir_all(&dir).ok();
    }
}

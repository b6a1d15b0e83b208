//! Per-tick feature vectors for the technical model
//!
//! Channel layout (12 per tick):
//!
//! | idx  | feature                                   |
//! |------|-------------------------------------------|
//! | 0    | price, z-scored over the model window     |
//! | 1-6  | SMA cross deltas (s-m, s-l, m-s, m-l, l-s, l-m) |
//! | 7-9  | Bollinger center/upper/lower minus price  |
//! | 10   | MACD line minus signal line               |
//! | 11   | RSI mapped to [-1, 1]                     |
//!
//! Channels 1-10 are scaled by the same price std as channel 0. Indicator
//! values that are not yet defined contribute 0.

use crate::indicators::{bollinger_series, macd_series, rsi_series, sma_series, IndicatorConfig};

pub const FEATURE_DIM: usize = 12;

pub type FeatureRow = [f32; FEATURE_DIM];

const STD_EPSILON: f64 = 1e-8;

/// Build `k` feature rows from the trailing prices
///
/// Indicators are computed over the whole slice, so passing more than `k`
/// prices lets early rows use real history instead of zero padding.
pub fn build_features(
    prices: &[f64],
    k: usize,
    config: &IndicatorConfig,
) -> Result<Vec<FeatureRow>, String> {
    if k == 0 {
        return Err("window length must be positive".to_string());
    }
    if prices.len() < k {
        return Err(format!("need {} prices, got {}", k, prices.len()));
    }

    let sma_short = sma_series(prices, config.sma_short);
    let sma_mid = sma_series(prices, config.sma_mid);
    let sma_long = sma_series(prices, config.sma_long);
    let bands = bollinger_series(prices, config.bollinger_window, config.bollinger_sigma);
    let macd = macd_series(prices, config.macd_short, config.macd_long, config.macd_signal);
    let rsi = rsi_series(prices, config.rsi_window);

    let start = prices.len() - k;
    let recent = &prices[start..];
    let mean = recent.iter().sum::<f64>() / k as f64;
    let std = (recent.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / k as f64).sqrt()
        + STD_EPSILON;

    let delta = |a: Option<f64>, b: Option<f64>| match (a, b) {
        (Some(a), Some(b)) => (a - b) / std,
        _ => 0.0,
    };

    let mut rows = Vec::with_capacity(k);
    for i in start..prices.len() {
        let price = prices[i];
        let (s, m, l) = (sma_short[i], sma_mid[i], sma_long[i]);

        let (center, upper, lower) = match bands[i] {
            Some(band) => (
                (band.center - price) / std,
                (band.upper - price) / std,
                (band.lower - price) / std,
            ),
            None => (0.0, 0.0, 0.0),
        };

        let row = [
            (price - mean) / std,
            delta(s, m),
            delta(s, l),
            delta(m, s),
            delta(m, l),
            delta(l, s),
            delta(l, m),
            center,
            upper,
            lower,
            macd[i].map(|p| p.histogram() / std).unwrap_or(0.0),
            rsi[i].map(|r| (r - 50.0) / 50.0).unwrap_or(0.0),
        ];

        if let Some(bad) = row.iter().find(|v| !v.is_finite()) {
            return Err(format!("non-finite feature value {} at offset {}", bad, i - start));
        }

        rows.push(row.map(|v| v as f32));
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f64> {
        (0..len).map(|i| 1000.0 + (i as f64 * 0.7).sin() * 10.0 + i as f64).collect()
    }

    #[test]
    fn test_shape() {
        let config = IndicatorConfig::default();
        let rows = build_features(&ramp(150), 90, &config).unwrap();
        assert_eq!(rows.len(), 90);
        assert_eq!(rows[0].len(), FEATURE_DIM);
    }

    #[test]
    fn test_insufficient_prices() {
        let config = IndicatorConfig::default();
        let err = build_features(&ramp(50), 90, &config).unwrap_err();
        assert!(err.contains("need 90"));
    }

    #[test]
    fn test_price_channel_is_zscored() {
        let config = IndicatorConfig::default();
        let rows = build_features(&ramp(120), 60, &config).unwrap();
        let mean: f32 = rows.iter().map(|r| r[0]).sum::<f32>() / rows.len() as f32;
        assert!(mean.abs() < 1e-3);
    }

    #[test]
    fn test_zero_padding_without_warmup() {
        let config = IndicatorConfig::default();
        // Exactly k prices: SMA(60) is undefined for the first 59 rows
        let rows = build_features(&ramp(90), 90, &config).unwrap();
        assert_eq!(rows[0][2], 0.0);
        assert_eq!(rows[58][2], 0.0);
        assert_ne!(rows[89][2], 0.0);
    }

    #[test]
    fn test_warm_history_has_no_padding() {
        let config = IndicatorConfig::default();
        let prices = ramp(90 + config.warmup_len());
        let rows = build_features(&prices, 90, &config).unwrap();
        assert!(rows.iter().all(|r| r[10] != 0.0 && r[2] != 0.0));
    }

    #[test]
    fn test_rsi_channel_bounded() {
        let config = IndicatorConfig::default();
        let rows = build_features(&ramp(150), 90, &config).unwrap();
        assert!(rows.iter().all(|r| (-1.0..=1.0).contains(&r[11])));
    }

    #[test]
    fn test_deterministic() {
        let config = IndicatorConfig::default();
        let prices = ramp(150);
        assert_eq!(
            build_features(&prices, 90, &config).unwrap(),
            build_features(&prices, 90, &config).unwrap()
        );
    }
}

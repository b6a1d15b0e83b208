/// Calculate Relative Strength Index (RSI)
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
pub fn calculate_rsi(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period + 1 {
        return None;
    }

    // Only the last `period` changes matter
    let recent = &prices[prices.len() - period - 1..];
    let mut gain_sum = 0.0;
    let mut loss_sum = 0.0;

    for pair in recent.windows(2) {
        let change = pair[1] - pair[0];
        if change > 0.0 {
            gain_sum += change;
        } else {
            loss_sum += change.abs();
        }
    }

    let avg_gain = gain_sum / period as f64;
    let avg_loss = loss_sum / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    let rsi = 100.0 - (100.0 / (1.0 + rs));

    Some(rsi)
}

/// RSI at every index, `None` until `period` changes are available
pub fn rsi_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..prices.len())
        .map(|i| calculate_rsi(&prices[..=i], period))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_calculation() {
        // Test with known values
        let prices = vec![
            44.0, 44.25, 44.5, 43.75, 44.0, 44.5, 45.0, 45.5, 45.25, 45.5,
            46.0, 46.5, 46.25, 46.0, 46.5,
        ];

        let rsi = calculate_rsi(&prices, 14);
        assert!(rsi.is_some());

        let rsi_value = rsi.unwrap();
        assert!(rsi_value > 0.0 && rsi_value < 100.0);
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let prices = vec![100.0, 102.0, 101.0];
        let rsi = calculate_rsi(&prices, 14);
        assert!(rsi.is_none());
    }

    #[test]
    fn test_rsi_all_gains() {
        let prices = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0];
        let rsi = calculate_rsi(&prices, 5);
        assert!(rsi.is_some());
        assert_eq!(rsi.unwrap(), 100.0);  // All gains = RSI 100
    }

    #[test]
    fn test_rsi_balanced_moves() {
        let prices = vec![100.0, 102.0, 100.0, 102.0, 100.0];
        assert_eq!(calculate_rsi(&prices, 4), Some(50.0));
    }

    #[test]
    fn test_rsi_series_defined_after_period() {
        let prices = vec![100.0, 101.0, 100.0, 101.0, 102.0];
        let series = rsi_series(&prices, 3);
        assert!(series[..3].iter().all(|v| v.is_none()));
        assert!(series[3].is_some());
        assert!(series[4].is_some());
    }
}

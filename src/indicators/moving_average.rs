/// Calculate Simple Moving Average (SMA)
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Calculate Exponential Moving Average (EMA)
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    ema_series(prices, period).last().copied().flatten()
}

/// SMA at every index, `None` until `period` prices are available
pub fn sma_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..prices.len())
        .map(|i| calculate_sma(&prices[..=i], period))
        .collect()
}

/// EMA at every index, seeded with the SMA of the first `period` prices
pub fn ema_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut series = vec![None; prices.len()];
    if period == 0 || prices.len() < period {
        return series;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);

    // Start with SMA
    let mut ema = prices[..period].iter().sum::<f64>() / period as f64;
    series[period - 1] = Some(ema);

    for (i, price) in prices.iter().enumerate().skip(period) {
        ema = (price - ema) * multiplier + ema;
        series[i] = Some(ema);
    }

    series
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        let sma = calculate_sma(&prices, 5);
        assert_eq!(sma, Some(104.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![100.0, 102.0];
        let sma = calculate_sma(&prices, 5);
        assert!(sma.is_none());
    }

    #[test]
    fn test_ema() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0, 110.0];
        let ema = calculate_ema(&prices, 5);
        assert!(ema.is_some());
        assert!(ema.unwrap() > 104.0); // EMA should be above initial SMA
    }

    #[test]
    fn test_sma_series_padding() {
        let prices = vec![1.0, 2.0, 3.0, 4.0];
        let series = sma_series(&prices, 3);
        assert_eq!(series, vec![None, None, Some(2.0), Some(3.0)]);
    }

    #[test]
    fn test_ema_series_starts_at_sma() {
        let prices = vec![2.0, 4.0, 6.0, 8.0];
        let series = ema_series(&prices, 3);
        assert_eq!(series[0], None);
        assert_eq!(series[1], None);
        assert_eq!(series[2], Some(4.0));
        // multiplier 0.5: (8 - 4) * 0.5 + 4
        assert_eq!(series[3], Some(6.0));
    }
}

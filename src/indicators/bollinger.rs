use super::moving_average::calculate_sma;

/// Bollinger band values at one index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBand {
    pub center: f64,
    pub upper: f64,
    pub lower: f64,
}

/// Bollinger bands at every index (population standard deviation)
pub fn bollinger_series(prices: &[f64], window: usize, sigma: f64) -> Vec<Option<BollingerBand>> {
    (0..prices.len())
        .map(|i| {
            let slice = &prices[..=i];
            let center = calculate_sma(slice, window)?;
            let recent = &slice[slice.len() - window..];
            let variance =
                recent.iter().map(|p| (p - center).powi(2)).sum::<f64>() / window as f64;
            let width = sigma * variance.sqrt();

            Some(BollingerBand {
                center,
                upper: center + width,
                lower: center - width,
            })
        })
        .collect()
}

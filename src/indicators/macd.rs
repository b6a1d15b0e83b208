use super::moving_average::ema_series;

/// MACD line and its signal line at one index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
}

impl MacdPoint {
    pub fn histogram(&self) -> f64 {
        self.macd - self.signal
    }
}

/// MACD at every index
///
/// The MACD line exists once the long EMA does; the signal line is an EMA of
/// the MACD line, so the first defined point is at `long - 1 + signal - 1`.
pub fn macd_series(
    prices: &[f64],
    short: usize,
    long: usize,
    signal: usize,
) -> Vec<Option<MacdPoint>> {
    let short_ema = ema_series(prices, short);
    let long_ema = ema_series(prices, long);

    let macd_line: Vec<Option<f64>> = short_ema
        .iter()
        .zip(&long_ema)
        .map(|(s, l)| Some((*s)? - (*l)?))
        .collect();

    let mut series = vec![None; prices.len()];
    let first = match macd_line.iter().position(|v| v.is_some()) {
        Some(first) => first,
        None => return series,
    };

    let defined: Vec<f64> = macd_line[first..].iter().flatten().copied().collect();
    let signal_line = ema_series(&defined, signal);

    for (offset, signal_value) in signal_line.into_iter().enumerate() {
        if let Some(signal_value) = signal_value {
            series[first + offset] = Some(MacdPoint {
                macd: defined[offset],
                signal: signal_value,
            });
        }
    }

    series
}

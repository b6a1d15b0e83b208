use crate::models::PriceObservation;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Market scenario types for synthetic price generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketScenario {
    /// Steady uptrend with noise (+2% daily average)
    Uptrend,
    /// Steady downtrend with noise (-2% daily average)
    Downtrend,
    /// Mean-reverting chop around the start price
    Sideways,
    /// Large random swings (±0.5% per minute)
    Volatile,
    /// Alternates trend up, chop and trend down every few hours
    Regimes,
}

impl std::str::FromStr for MarketScenario {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "uptrend" => Ok(Self::Uptrend),
            "downtrend" => Ok(Self::Downtrend),
            "sideways" => Ok(Self::Sideways),
            "volatile" => Ok(Self::Volatile),
            "regimes" => Ok(Self::Regimes),
            other => Err(format!("unknown scenario '{}'", other)),
        }
    }
}

/// Generates one-minute synthetic prices for replay
pub struct SyntheticPriceGenerator {
    rng: StdRng,
    base_price: f64,
}

impl SyntheticPriceGenerator {
    /// Create a new generator with a seed for reproducibility
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            base_price: 10_000_000.0,
        }
    }

    pub fn with_base_price(mut self, base_price: f64) -> Self {
        self.base_price = base_price;
        self
    }

    /// `count` one-minute observations ending at `end`
    pub fn generate(
        &mut self,
        scenario: MarketScenario,
        count: usize,
        end: DateTime<Utc>,
    ) -> Vec<PriceObservation> {
        let start = end - Duration::minutes(count as i64);
        let minutes_per_day = 24.0 * 60.0;
        let mut price = self.base_price;
        let mut observations = Vec::with_capacity(count);

        for i in 0..count {
            let step = match scenario {
                MarketScenario::Uptrend => self.trend(price, 0.02 / minutes_per_day),
                MarketScenario::Downtrend => self.trend(price, -0.02 / minutes_per_day),
                MarketScenario::Sideways => self.chop(price),
                MarketScenario::Volatile => price * self.rng.gen_range(-0.005..0.005),
                MarketScenario::Regimes => match (i / 240) % 3 {
                    0 => self.trend(price, 0.05 / minutes_per_day),
                    1 => self.chop(price),
                    _ => self.trend(price, -0.05 / minutes_per_day),
                },
            };

            // Keep the walk well inside positive territory
            price = (price + step).max(self.base_price * 0.5);

            let timestamp = start + Duration::minutes(i as i64 + 1);
            observations.push(PriceObservation::new(timestamp, price));
        }

        observations
    }

    fn trend(&mut self, price: f64, drift: f64) -> f64 {
        price * drift + price * self.rng.gen_range(-0.0005..0.0005)
    }

    fn chop(&mut self, price: f64) -> f64 {
        let reversion = (self.base_price - price) * 0.05;
        reversion + price * self.rng.gen_range(-0.001..0.001)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_series() {
        let end = Utc::now();
        let a = SyntheticPriceGenerator::new(7).generate(MarketScenario::Volatile, 200, end);
        let b = SyntheticPriceGenerator::new(7).generate(MarketScenario::Volatile, 200, end);
        assert_eq!(a, b);
    }

    #[test]
    fn test_series_is_minute_spaced_and_positive() {
        let end = Utc::now();
        let series = SyntheticPriceGenerator::new(1).generate(MarketScenario::Regimes, 1000, end);

        assert_eq!(series.len(), 1000);
        assert_eq!(series.last().unwrap().timestamp, end);
        assert!(series.iter().all(|o| o.price > 0.0));
        assert!(series
            .windows(2)
            .all(|w| (w[1].timestamp - w[0].timestamp).num_seconds() == 60));
    }

    #[test]
    fn test_base_price_sets_level() {
        let series = SyntheticPriceGenerator::new(5)
            .with_base_price(5_000_000.0)
            .generate(MarketScenario::Sideways, 500, Utc::now());

        assert!((series[0].price - 5_000_000.0).abs() < 5_000_000.0 * 0.01);
        assert!(series.iter().all(|o| o.price >= 2_500_000.0));
    }

    #[test]
    fn test_uptrend_drifts_up() {
        let series =
            SyntheticPriceGenerator::new(3).generate(MarketScenario::Uptrend, 60 * 24 * 5, Utc::now());
        assert!(series.last().unwrap().price > series[0].price);
    }

    #[test]
    fn test_parse_scenario() {
        assert_eq!("Regimes".parse::<MarketScenario>(), Ok(MarketScenario::Regimes));
        assert!("moon".parse::<MarketScenario>().is_err());
    }
}

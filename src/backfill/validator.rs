use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::PriceObservation;

/// Why a historical batch is unfit for seeding
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("historical source returned no data")]
    Empty,

    #[error("insufficient history: {have} observations, need {need}")]
    Insufficient { have: usize, need: usize },

    #[error("non-positive price {price} at index {index}")]
    NonPositivePrice { index: usize, price: f64 },

    #[error("timestamps not strictly increasing at index {index}")]
    NotStrictlyOrdered { index: usize },

    #[error("gap of {secs}s before {at} exceeds {max_secs}s")]
    Gap {
        at: DateTime<Utc>,
        secs: i64,
        max_secs: u64,
    },

    #[error("newest observation {newest} is {age_secs}s old")]
    Stale { newest: DateTime<Utc>, age_secs: i64 },

    #[error("max/min price ratio {ratio:.2} exceeds {max:.2}")]
    PriceRange { ratio: f64, max: f64 },
}

/// Sanity checks for a backfilled price series
#[derive(Debug, Clone, Copy)]
pub struct HistoryValidator {
    pub min_len: usize,
    pub max_gap_secs: u64,
    pub max_price_ratio: f64,
}

impl HistoryValidator {
    pub fn new(min_len: usize, max_gap_secs: u64, max_price_ratio: f64) -> Self {
        Self {
            min_len,
            max_gap_secs,
            max_price_ratio,
        }
    }

    /// Validate against a reference `now` (the newest point must be recent)
    pub fn validate(
        &self,
        observations: &[PriceObservation],
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        let newest = observations.last().ok_or(ValidationError::Empty)?;

        if let Some((index, o)) = observations
            .iter()
            .enumerate()
            .find(|(_, o)| !(o.price.is_finite() && o.price > 0.0))
        {
            return Err(ValidationError::NonPositivePrice {
                index,
                price: o.price,
            });
        }

        for (i, pair) in observations.windows(2).enumerate() {
            let secs = (pair[1].timestamp - pair[0].timestamp).num_seconds();
            if pair[1].timestamp <= pair[0].timestamp {
                return Err(ValidationError::NotStrictlyOrdered { index: i + 1 });
            }
            if secs > self.max_gap_secs as i64 {
                return Err(ValidationError::Gap {
                    at: pair[1].timestamp,
                    secs,
                    max_secs: self.max_gap_secs,
                });
            }
        }

        if observations.len() < self.min_len {
            return Err(ValidationError::Insufficient {
                have: observations.len(),
                need: self.min_len,
            });
        }

        let age_secs = (now - newest.timestamp).num_seconds();
        if age_secs > self.max_gap_secs as i64 {
            return Err(ValidationError::Stale {
                newest: newest.timestamp,
                age_secs,
            });
        }

        let (min, max) = observations
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), o| {
                (lo.min(o.price), hi.max(o.price))
            });
        let ratio = max / min;
        if ratio > self.max_price_ratio {
            return Err(ValidationError::PriceRange {
                ratio,
                max: self.max_price_ratio,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    /// `count` one-minute observations ending one minute before now
    fn series(count: i64) -> Vec<PriceObservation> {
        (0..count)
            .map(|i| PriceObservation::new(now() - Duration::minutes(count - i), 5_000_000.0 + i as f64))
            .collect()
    }

    fn validator() -> HistoryValidator {
        HistoryValidator::new(90, 180, 2.0)
    }

    #[test]
    fn test_valid_series() {
        assert_eq!(validator().validate(&series(120), now()), Ok(()));
    }

    #[test]
    fn test_empty() {
        assert_eq!(validator().validate(&[], now()), Err(ValidationError::Empty));
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            validator().validate(&series(50), now()),
            Err(ValidationError::Insufficient { have: 50, need: 90 })
        );
    }

    #[test]
    fn test_duplicate_timestamp() {
        let mut data = series(100);
        data[10].timestamp = data[9].timestamp;
        assert_eq!(
            validator().validate(&data, now()),
            Err(ValidationError::NotStrictlyOrdered { index: 10 })
        );
    }

    #[test]
    fn test_gap_too_large() {
        let mut data = series(100);
        data.drain(50..54);
        assert_eq!(data.len(), 96);
        assert!(matches!(
            validator().validate(&data, now()),
            Err(ValidationError::Gap { secs: 300, .. })
        ));
    }

    #[test]
    fn test_stale_data() {
        let data = series(100);
        let later = now() + Duration::hours(2);
        assert!(matches!(
            validator().validate(&data, later),
            Err(ValidationError::Stale { .. })
        ));
    }

    #[test]
    fn test_bad_price() {
        let mut data = series(100);
        data[3].price = 0.0;
        assert!(matches!(
            validator().validate(&data, now()),
            Err(ValidationError::NonPositivePrice { index: 3, .. })
        ));
    }

    #[test]
    fn test_price_ratio() {
        let mut data = series(100);
        data[99].price = 20_000_000.0;
        assert!(matches!(
            validator().validate(&data, now()),
            Err(ValidationError::PriceRange { .. })
        ));
    }
}

use crate::models::PriceObservation;
use std::collections::VecDeque;
use thiserror::Error;

/// Rejected price history mutations; the history is left untouched
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HistoryError {
    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    #[error("observation at {new} precedes last stored observation at {last}")]
    OutOfOrder {
        last: chrono::DateTime<chrono::Utc>,
        new: chrono::DateTime<chrono::Utc>,
    },

    #[error("invalid price {0}: prices must be positive and finite")]
    InvalidPrice(f64),
}

/// Bounded, append-only window of price observations for one instrument
///
/// Keeps at most `capacity` observations, evicting the oldest. Readiness is
/// monotonic: once `k` observations are held, neither eviction (capacity is
/// never below `k`) nor reseeding can take the history back below `k`.
#[derive(Debug, Clone)]
pub struct PriceHistory {
    data: VecDeque<PriceObservation>,
    k: usize,
    capacity: usize,
}

impl PriceHistory {
    /// Create an empty history
    ///
    /// # Arguments
    /// * `k` - Observations required before the model is ready
    /// * `capacity` - Retention bound; raised to `k` if smaller
    pub fn new(k: usize, capacity: usize) -> Self {
        let capacity = capacity.max(k);
        Self {
            data: VecDeque::with_capacity(capacity),
            k,
            capacity,
        }
    }

    /// Replace all contents in one step
    ///
    /// Only the newest `capacity` observations are kept. Fails without
    /// touching existing contents if the batch is empty, unordered, contains
    /// a non-positive price, or would revoke readiness.
    pub fn seed(&mut self, observations: &[PriceObservation]) -> Result<usize, HistoryError> {
        if observations.is_empty() {
            return Err(HistoryError::InvalidSeed("no observations".to_string()));
        }

        if let Some(bad) = observations.iter().find(|o| !valid_price(o.price)) {
            return Err(HistoryError::InvalidSeed(format!(
                "price {} at {} is not positive",
                bad.price, bad.timestamp
            )));
        }

        if let Some(pair) = observations
            .windows(2)
            .find(|pair| pair[1].timestamp < pair[0].timestamp)
        {
            return Err(HistoryError::InvalidSeed(format!(
                "timestamps out of order: {} after {}",
                pair[1].timestamp, pair[0].timestamp
            )));
        }

        if self.is_ready() && observations.len() < self.k {
            return Err(HistoryError::InvalidSeed(format!(
                "{} observations would drop a ready history below {}",
                observations.len(),
                self.k
            )));
        }

        let keep_from = observations.len().saturating_sub(self.capacity);
        self.data = observations[keep_from..].iter().copied().collect();

        Ok(self.data.len())
    }

    /// Add one observation, evicting the oldest beyond capacity
    pub fn append(&mut self, observation: PriceObservation) -> Result<(), HistoryError> {
        if !valid_price(observation.price) {
            return Err(HistoryError::InvalidPrice(observation.price));
        }

        if let Some(last) = self.data.back() {
            if observation.timestamp < last.timestamp {
                return Err(HistoryError::OutOfOrder {
                    last: last.timestamp,
                    new: observation.timestamp,
                });
            }
        }

        self.data.push_back(observation);

        // Remove oldest if exceeds capacity
        while self.data.len() > self.capacity {
            self.data.pop_front();
        }

        Ok(())
    }

    /// The last `n` observations (fewer if not enough are stored), oldest first
    pub fn window(&self, n: usize) -> Vec<PriceObservation> {
        let skip = self.data.len().saturating_sub(n);
        self.data.iter().skip(skip).copied().collect()
    }

    /// Prices of the last `n` observations, oldest first
    pub fn prices(&self, n: usize) -> Vec<f64> {
        let skip = self.data.len().saturating_sub(n);
        self.data.iter().skip(skip).map(|o| o.price).collect()
    }

    /// True iff at least `k` observations are stored
    pub fn is_ready_for(&self, k: usize) -> bool {
        self.data.len() >= k
    }

    /// Readiness against the configured model window
    pub fn is_ready(&self) -> bool {
        self.is_ready_for(self.k)
    }

    pub fn latest(&self) -> Option<&PriceObservation> {
        self.data.back()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn valid_price(price: f64) -> bool {
    price.is_finite() && price > 0.0
}

pub mod metrics;
pub mod runner;
pub mod synthetic;

pub use metrics::ReplayMetrics;
pub use runner::{ReplayRunner, ReplaySource};
pub use synthetic::{MarketScenario, SyntheticPriceGenerator};

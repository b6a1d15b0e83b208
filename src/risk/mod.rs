// Risk estimation and position sizing
pub mod estimator;

pub use estimator::{PositionSizer, RiskError, RiskEstimator};

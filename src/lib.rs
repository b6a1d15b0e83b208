// Core modules
pub mod api;
pub mod backfill;
pub mod backtest;
pub mod config;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod prediction;
pub mod risk;

// Re-export commonly used types
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

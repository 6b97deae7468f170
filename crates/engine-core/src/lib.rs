pub mod config;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod progress;
pub mod state;

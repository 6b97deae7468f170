use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid setting '{setting}': {reason}")]
    Invalid {
        setting: &'static str,
        reason: String,
    },
}

/// Errors surfaced by the rate limiter. Both waits are cooperative: a stop
/// request observed mid-wait resolves to `Cancelled` rather than blocking
/// further.
#[derive(Debug, Error)]
pub enum LimiterError {
    #[error("Cancelled while waiting for a concurrency slot")]
    Cancelled,

    #[error("Limiter closed")]
    Closed,
}

/// Errors surfaced by a commit sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to persist committed units: {source}")]
    Persist {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Persistence worker stopped: {0}")]
    WorkerGone(String),
}

use engine_core::error::{ConfigError, SinkError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn the producer thread: {0}")]
    ProducerSpawn(#[from] std::io::Error),

    #[error("Producer thread panicked")]
    ProducerPanicked,

    #[error("Pipeline task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Commit persistence failed: {0}")]
    Sink(#[from] SinkError),
}

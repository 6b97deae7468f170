use std::time::Duration;
use thiserror::Error;

/// Failure taxonomy of one executed batch request.
///
/// None of these are fatal to the pipeline: the committer hands the
/// context back to the scheduler, which narrows, retries or force-accepts.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Response failed verification: {0}")]
    Verification(String),

    #[error("Cancelled before the request completed")]
    Cancelled,

    #[error("Unexpected error: {0}")]
    Unexpected(#[from] Box<dyn std::error::Error + Send + Sync>),
}

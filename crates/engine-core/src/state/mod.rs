use crate::error::SinkError;
use async_trait::async_trait;
use model::{progress::ProgressSnapshot, report::GlossaryTerm, unit::Unit};
use std::sync::Arc;

pub mod memory;
pub mod models;
pub mod sled_store;

pub use memory::MemorySink;
pub use sled_store::SledCommitSink;

/// Persistence seam for the committer, the single writer of the run.
///
/// One call persists one commit payload atomically: the units finalized by
/// that commit, any glossary terms the executor mined, and the progress
/// snapshot as of that commit. Hosts with their own project store
/// implement this; `SledCommitSink` is the built-in durable option.
#[async_trait]
pub trait CommitSink: Send + Sync {
    async fn persist(
        &self,
        units: &[Arc<Unit>],
        terms: &[GlossaryTerm],
        progress: &ProgressSnapshot,
    ) -> Result<(), SinkError>;
}

use crate::error::TranslateError;
use async_trait::async_trait;
use model::{context::TaskContext, report::TaskReport};

/// One network round trip for one context.
///
/// Implementations own the vendor-specific request formatting, response
/// parsing and validation. The contract with the orchestrator:
///
/// * every unit that passes validation is marked `Processed` (destination
///   text set) before the call returns;
/// * units that fail validation are left at `None` — the scheduler will
///   re-enter them;
/// * a transport or protocol failure returns `Err` with no status changes,
///   and the whole batch re-enters scheduling.
#[async_trait]
pub trait BatchTranslator: Send + Sync {
    async fn translate(&self, ctx: &TaskContext) -> Result<TaskReport, TranslateError>;

    /// Release any pooled network resources. Called once per worker on
    /// exit and once more at shutdown, under a bounded timeout; must be
    /// safe to call repeatedly.
    async fn close(&self) {}
}

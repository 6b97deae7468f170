use crate::unit::Unit;
use std::sync::Arc;

/// Dispatch priority of a queued context. `High` is reserved for retries
/// and splits; first-pass work runs at `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    High,
    Normal,
}

/// Ephemeral scheduling record wrapping one request batch.
///
/// Created by the scheduler, consumed exactly once by a pipeline worker and
/// discarded after the committer has processed its result. Failure handling
/// spawns new contexts; an existing context is never mutated.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Units to translate in this request.
    pub batch: Vec<Arc<Unit>>,
    /// Preceding units supplied read-only for continuity.
    pub lookback: Vec<Arc<Unit>>,
    /// Token ceiling that produced this batch.
    pub threshold: usize,
    /// How many times this lineage has been narrowed.
    pub split_count: u32,
    /// How many times this exact batch has been resent.
    pub retry_count: u32,
    /// True for first-pass contexts out of the initial chunking.
    pub initial: bool,
}

impl TaskContext {
    pub fn initial(batch: Vec<Arc<Unit>>, lookback: Vec<Arc<Unit>>, threshold: usize) -> Self {
        TaskContext {
            batch,
            lookback,
            threshold,
            split_count: 0,
            retry_count: 0,
            initial: true,
        }
    }

    /// Batch units still awaiting translation.
    pub fn remaining(&self) -> Vec<Arc<Unit>> {
        self.batch
            .iter()
            .filter(|u| !u.status().is_final())
            .cloned()
            .collect()
    }

    /// Batch units the committer should persist.
    pub fn finalized(&self) -> Vec<Arc<Unit>> {
        self.batch
            .iter()
            .filter(|u| u.status().is_final())
            .cloned()
            .collect()
    }

    pub fn token_total(&self) -> usize {
        self.batch.iter().map(|u| u.token_estimate()).sum()
    }
}

/// A task context tagged with its dispatch priority.
#[derive(Debug, Clone)]
pub struct QueuedContext {
    pub priority: Priority,
    pub context: TaskContext,
}

impl QueuedContext {
    pub fn normal(context: TaskContext) -> Self {
        QueuedContext {
            priority: Priority::Normal,
            context,
        }
    }

    pub fn high(context: TaskContext) -> Self {
        QueuedContext {
            priority: Priority::High,
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitStatus;

    #[test]
    fn remaining_tracks_unit_status() {
        let a = Unit::from_text("one", "f").shared();
        let b = Unit::from_text("two", "f").shared();
        let ctx = TaskContext::initial(vec![a.clone(), b.clone()], vec![], 100);

        assert_eq!(ctx.remaining().len(), 2);
        assert!(ctx.finalized().is_empty());

        a.set_status(UnitStatus::Processed);
        assert_eq!(ctx.remaining().len(), 1);
        assert_eq!(ctx.finalized().len(), 1);
        assert_eq!(ctx.remaining()[0].id(), b.id());
    }
}

use chrono::{DateTime, Utc};
use model::{
    progress::ProgressSnapshot,
    report::TaskReport,
    unit::{Unit, UnitStatus},
};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Incremental progress accounting, owned by the committer.
///
/// Counters accumulate per commit; `reconcile` recomputes them from the
/// authoritative unit statuses to correct any drift from concurrent
/// updates.
#[derive(Debug)]
pub struct ProgressTracker {
    processed: u64,
    errored: u64,
    total: u64,
    input_tokens: u64,
    output_tokens: u64,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total: u64) -> Self {
        ProgressTracker {
            processed: 0,
            errored: 0,
            total,
            input_tokens: 0,
            output_tokens: 0,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Fold one committed payload into the counters. `finalized` holds the
    /// units that reached a terminal state in this commit; every unit is
    /// finalized by exactly one commit, so plain addition stays consistent.
    pub fn apply_commit(&mut self, finalized: &[Arc<Unit>], report: &TaskReport) {
        for unit in finalized {
            match unit.status() {
                UnitStatus::Processed => self.processed += 1,
                UnitStatus::Error => self.errored += 1,
                _ => {}
            }
        }
        self.input_tokens += report.input_tokens;
        self.output_tokens += report.output_tokens;
    }

    /// Recount from the authoritative unit statuses.
    pub fn reconcile(&mut self, units: &[Arc<Unit>]) {
        let mut processed = 0u64;
        let mut errored = 0u64;
        for unit in units {
            match unit.status() {
                UnitStatus::Processed => processed += 1,
                UnitStatus::Error => errored += 1,
                _ => {}
            }
        }
        if processed != self.processed || errored != self.errored {
            debug!(
                drift_processed = processed as i64 - self.processed as i64,
                drift_errored = errored as i64 - self.errored as i64,
                "Reconciled progress counters against unit statuses"
            );
        }
        self.processed = processed;
        self.errored = errored;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            processed: self.processed,
            errored: self.errored,
            total: self.total,
            input_tokens: self.input_tokens,
            output_tokens: self.output_tokens,
            started_at: self.started_at,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_per_commit_and_reconciles() {
        let units: Vec<Arc<Unit>> = (0..4)
            .map(|i| Unit::from_text(format!("line {i}"), "a.txt").shared())
            .collect();
        let mut tracker = ProgressTracker::new(units.len() as u64);

        units[0].set_status(UnitStatus::Processed);
        units[1].set_status(UnitStatus::Error);
        let report = TaskReport {
            processed: 1,
            errors: 1,
            input_tokens: 50,
            output_tokens: 40,
            new_terms: vec![],
        };
        tracker.apply_commit(&units[0..2].to_vec(), &report);

        let snap = tracker.snapshot();
        assert_eq!(snap.processed, 1);
        assert_eq!(snap.errored, 1);
        assert_eq!(snap.input_tokens, 50);
        assert!(!snap.is_done());

        // A status written behind the tracker's back is picked up on
        // reconcile.
        units[2].set_status(UnitStatus::Processed);
        tracker.reconcile(&units);
        assert_eq!(tracker.snapshot().processed, 2);
    }
}

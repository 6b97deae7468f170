use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic accounting of a run, emitted by the committer after every
/// commit. Counters accumulate incrementally and are periodically
/// reconciled against the authoritative unit statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub processed: u64,
    pub errored: u64,
    pub total: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
}

impl ProgressSnapshot {
    pub fn empty(total: u64) -> Self {
        ProgressSnapshot {
            processed: 0,
            errored: 0,
            total,
            input_tokens: 0,
            output_tokens: 0,
            started_at: Utc::now(),
            elapsed_secs: 0.0,
        }
    }

    /// Units in a terminal state, whether accepted or forced.
    pub fn completed(&self) -> u64 {
        self.processed + self.errored
    }

    pub fn is_done(&self) -> bool {
        self.completed() >= self.total
    }
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self::empty(0)
    }
}

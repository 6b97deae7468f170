use crate::chunker::Chunker;
use engine_core::config::EngineConfig;
use model::{
    context::{QueuedContext, TaskContext},
    unit::{Unit, UnitStatus},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{debug, warn};

/// Turns the working set into dispatchable contexts and decides what to do
/// when a batch comes back incomplete: narrow and re-chunk, retry a single
/// unit, or force-accept it.
///
/// Every unit eventually reaches `Processed` or `Error`: split batches
/// strictly shrink (the narrowing factor is below one), and single-unit
/// retries are bounded by the configured ceiling.
pub struct Scheduler {
    units: Vec<Arc<Unit>>,
    init_threshold: usize,
    /// Narrowing factor, derived once from the initial threshold. Reusing
    /// it for every split keeps the number of narrowing rounds bounded;
    /// recomputing from the current threshold would change convergence.
    split_factor: f64,
    lookback_limit: usize,
    max_unit_retries: u32,
    anomaly_logged: AtomicBool,
}

impl Scheduler {
    pub fn new(units: Vec<Arc<Unit>>, config: &EngineConfig) -> Self {
        let init_threshold = config.token_threshold.max(1);
        let split_factor =
            (16.0 / (init_threshold.max(17) as f64)).powf(config.narrow_exponent);

        Scheduler {
            units,
            init_threshold,
            split_factor,
            lookback_limit: config.lookback_limit,
            max_unit_retries: config.max_unit_retries,
            anomaly_logged: AtomicBool::new(false),
        }
    }

    pub fn total_units(&self) -> usize {
        self.units.len()
    }

    /// Units the run can actually finalize. Upstream exclusions
    /// (`Excluded`, `Duplicated`) never become `Processed` or `Error`, so
    /// they must not count toward completion.
    pub fn trackable_units(&self) -> usize {
        self.units
            .iter()
            .filter(|u| !u.status().is_excluded())
            .count()
    }

    pub fn units(&self) -> &[Arc<Unit>] {
        &self.units
    }

    pub fn pending_units(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.status() == UnitStatus::None)
            .count()
    }

    /// Lazily chunk the full working set into first-pass contexts.
    pub fn initial_contexts(&self) -> impl Iterator<Item = QueuedContext> + Send + use<> {
        let threshold = self.init_threshold;
        Chunker::new(self.units.clone(), threshold, self.lookback_limit).map(move |plan| {
            QueuedContext::normal(TaskContext::initial(plan.batch, plan.lookback, threshold))
        })
    }

    /// Decide the follow-up for a context whose batch did not fully
    /// succeed. Returns zero or more high-priority contexts covering the
    /// units still awaiting translation.
    pub fn handle_failed_context(&self, ctx: &TaskContext) -> Vec<QueuedContext> {
        let remaining = ctx.remaining();
        match remaining.as_slice() {
            [] => Vec::new(),
            [unit] => self.retry_or_force(ctx, unit.clone()),
            _ => self.narrow(ctx, remaining),
        }
    }

    /// Multi-unit failure: shrink the token threshold and re-chunk the
    /// remainder. Split batches give up lookback context in favor of
    /// convergence. At the threshold floor, fall back to one context per
    /// unit instead of re-chunking.
    fn narrow(&self, ctx: &TaskContext, remaining: Vec<Arc<Unit>>) -> Vec<QueuedContext> {
        if ctx.threshold <= 1 {
            debug!(
                units = remaining.len(),
                split_count = ctx.split_count + 1,
                "Threshold floor reached, dispatching per-unit contexts"
            );
            return remaining
                .into_iter()
                .map(|unit| {
                    QueuedContext::high(TaskContext {
                        batch: vec![unit],
                        lookback: Vec::new(),
                        threshold: ctx.threshold,
                        split_count: ctx.split_count + 1,
                        retry_count: 0,
                        initial: false,
                    })
                })
                .collect();
        }

        let new_threshold = ((ctx.threshold as f64 * self.split_factor).floor() as usize).max(1);
        debug!(
            old_threshold = ctx.threshold,
            new_threshold,
            units = remaining.len(),
            "Narrowing failed batch"
        );

        Chunker::new(remaining, new_threshold, 0)
            .map(|plan| {
                QueuedContext::high(TaskContext {
                    batch: plan.batch,
                    lookback: Vec::new(),
                    threshold: new_threshold,
                    split_count: ctx.split_count + 1,
                    retry_count: 0,
                    initial: false,
                })
            })
            .collect()
    }

    /// Single-unit failure: bounded retries, then force-accept so the run
    /// still terminates with every unit in a terminal state.
    fn retry_or_force(&self, ctx: &TaskContext, unit: Arc<Unit>) -> Vec<QueuedContext> {
        if unit.retries() < self.max_unit_retries {
            let attempt = unit.bump_retries();
            debug!(
                unit = %unit.id(),
                attempt,
                max = self.max_unit_retries,
                "Retrying single-unit batch"
            );
            return vec![QueuedContext::high(TaskContext {
                batch: vec![unit],
                lookback: ctx.lookback.clone(),
                threshold: ctx.threshold,
                split_count: ctx.split_count,
                retry_count: ctx.retry_count + 1,
                initial: false,
            })];
        }

        warn!(
            unit = %unit.id(),
            retries = unit.retries(),
            "Retries exhausted, force-accepting with source text"
        );
        if unit.dst().map_or(true, |d| d.is_empty()) {
            unit.set_dst(unit.src());
        }
        unit.set_status(UnitStatus::Error);
        Vec::new()
    }

    /// Drain predicate for the driving loop: true only when nothing is
    /// queued and nothing is executing. Any unit still pending at that
    /// point is a bookkeeping anomaly, logged once per run.
    pub fn should_stop(&self, queued: usize, running: usize) -> bool {
        if queued > 0 || running > 0 {
            return false;
        }
        let pending = self.pending_units();
        if pending > 0 && !self.anomaly_logged.swap(true, Ordering::SeqCst) {
            warn!(pending, "Queue drained with units still untranslated");
        }
        true
    }
}

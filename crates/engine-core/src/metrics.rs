use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    units_processed: AtomicU64,
    units_errored: AtomicU64,
    batches_committed: AtomicU64,
    retry_count: AtomicU64,
    split_count: AtomicU64,
    failure_count: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
}

/// Cheap shared run counters. Cloning hands out another handle to the same
/// counters.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub units_processed: u64,
    pub units_errored: u64,
    pub batches_committed: u64,
    pub retry_count: u64,
    pub split_count: u64,
    pub failure_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_processed(&self, count: u64) {
        self.inner
            .units_processed
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_errored(&self, count: u64) {
        self.inner.units_errored.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_batches(&self, count: u64) {
        self.inner
            .batches_committed
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retries(&self, count: u64) {
        self.inner.retry_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_splits(&self, count: u64) {
        self.inner.split_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_failures(&self, count: u64) {
        self.inner.failure_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_token_usage(&self, input: u64, output: u64) {
        self.inner.input_tokens.fetch_add(input, Ordering::Relaxed);
        self.inner.output_tokens.fetch_add(output, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            units_processed: self.inner.units_processed.load(Ordering::Relaxed),
            units_errored: self.inner.units_errored.load(Ordering::Relaxed),
            batches_committed: self.inner.batches_committed.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
            split_count: self.inner.split_count.load(Ordering::Relaxed),
            failure_count: self.inner.failure_count.load(Ordering::Relaxed),
            input_tokens: self.inner.input_tokens.load(Ordering::Relaxed),
            output_tokens: self.inner.output_tokens.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = Metrics::new();
        let other = metrics.clone();
        metrics.increment_processed(3);
        other.increment_processed(2);
        other.add_token_usage(10, 7);

        let snap = metrics.snapshot();
        assert_eq!(snap.units_processed, 5);
        assert_eq!(snap.input_tokens, 10);
        assert_eq!(snap.output_tokens, 7);
    }
}

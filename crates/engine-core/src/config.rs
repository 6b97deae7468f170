use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Concurrency bound applied when the host configures 0 ("unbounded"):
/// effective concurrency must still be capped.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Host-owned knobs for one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum in-flight requests. 0 falls back to
    /// `DEFAULT_MAX_CONCURRENCY`, never unbounded.
    pub max_concurrency: usize,

    /// Request-rate ceilings. The tighter of the two drives the token
    /// bucket; its capacity doubles as the allowed burst size.
    pub requests_per_second: f64,
    pub requests_per_minute: f64,

    /// Initial token ceiling per batch. Platform-specific; the host owns
    /// the real value.
    pub token_threshold: usize,

    /// Maximum preceding units supplied as continuity context.
    pub lookback_limit: usize,

    /// Single-unit retries before force-accept.
    pub max_unit_retries: u32,

    /// Exponent of the threshold-narrowing factor. Empirically chosen,
    /// exposed rather than hard-coded.
    pub narrow_exponent: f64,

    /// Capacity of the producer-to-pump channel.
    pub feed_capacity: usize,
    /// Capacity of the normal-priority context queue.
    pub queue_capacity: usize,
    /// Capacity of the commit channel.
    pub commit_capacity: usize,

    /// Worker queue-poll timeout in milliseconds.
    pub poll_interval_ms: u64,
    /// Bound on resource-cleanup steps at shutdown.
    pub shutdown_timeout_ms: u64,
    /// Reconcile progress counters against unit statuses every N commits.
    /// 0 disables periodic reconciliation; the final reconcile still runs.
    pub reconcile_every: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            requests_per_second: 4.0,
            requests_per_minute: 240.0,
            token_threshold: 1024,
            lookback_limit: 10,
            max_unit_retries: 3,
            narrow_exponent: 0.25,
            feed_capacity: 32,
            queue_capacity: 64,
            commit_capacity: 32,
            poll_interval_ms: 100,
            shutdown_timeout_ms: 3_000,
            reconcile_every: 32,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.requests_per_second <= 0.0 {
            return Err(ConfigError::Invalid {
                setting: "requests_per_second",
                reason: format!("must be positive, got {}", self.requests_per_second),
            });
        }
        if self.requests_per_minute <= 0.0 {
            return Err(ConfigError::Invalid {
                setting: "requests_per_minute",
                reason: format!("must be positive, got {}", self.requests_per_minute),
            });
        }
        if self.token_threshold == 0 {
            return Err(ConfigError::Invalid {
                setting: "token_threshold",
                reason: "must be at least 1".into(),
            });
        }
        // Exponent 0 would make the narrowing factor 1.0 and re-chunk a
        // failing batch at the same threshold forever.
        if !(self.narrow_exponent > 0.0 && self.narrow_exponent <= 1.0) {
            return Err(ConfigError::Invalid {
                setting: "narrow_exponent",
                reason: format!("must be in (0, 1], got {}", self.narrow_exponent),
            });
        }
        if self.queue_capacity == 0 || self.commit_capacity == 0 || self.feed_capacity == 0 {
            return Err(ConfigError::Invalid {
                setting: "channel capacities",
                reason: "queue, commit and feed capacities must be non-zero".into(),
            });
        }
        Ok(())
    }

    pub fn effective_concurrency(&self) -> usize {
        if self.max_concurrency == 0 {
            DEFAULT_MAX_CONCURRENCY
        } else {
            self.max_concurrency
        }
    }

    /// Token-bucket capacity and refill rate: the tighter of the per-second
    /// and per-minute ceilings.
    pub fn bucket_capacity(&self) -> f64 {
        self.requests_per_second
            .min(self.requests_per_minute / 60.0)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_concurrency_falls_back_to_default() {
        let cfg = EngineConfig {
            max_concurrency: 0,
            ..Default::default()
        };
        assert_eq!(cfg.effective_concurrency(), DEFAULT_MAX_CONCURRENCY);
    }

    #[test]
    fn bucket_capacity_takes_the_tighter_ceiling() {
        let cfg = EngineConfig {
            requests_per_second: 10.0,
            requests_per_minute: 120.0,
            ..Default::default()
        };
        // 120/min is 2/s, tighter than 10/s.
        assert_eq!(cfg.bucket_capacity(), 2.0);
    }

    #[test]
    fn rejects_degenerate_narrow_exponents() {
        for bad in [0.0, -0.5, 1.5, f64::NAN] {
            let cfg = EngineConfig {
                narrow_exponent: bad,
                ..Default::default()
            };
            assert!(cfg.validate().is_err(), "accepted exponent {bad}");
        }
    }

    #[test]
    fn rejects_non_positive_rates() {
        let cfg = EngineConfig {
            requests_per_second: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}

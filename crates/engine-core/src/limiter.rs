use crate::{config::EngineConfig, error::LimiterError};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Upper bound on one quota sleep so a stop request is observed promptly.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    rate: f64,
    tokens: f64,
    last: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last = now;
    }
}

/// Dual-axis request throttle: a counting permit pool bounds in-flight
/// requests, a token bucket bounds requests per time window. Every request
/// cycle is `acquire` -> `wait` -> work -> permit drop.
#[derive(Debug)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    bucket: Mutex<Bucket>,
    held: AtomicUsize,
    peak_held: AtomicUsize,
}

impl RateLimiter {
    pub fn new(config: &EngineConfig) -> Self {
        let capacity = config.bucket_capacity();
        RateLimiter {
            semaphore: Arc::new(Semaphore::new(config.effective_concurrency())),
            bucket: Mutex::new(Bucket {
                capacity,
                rate: capacity,
                // Full bucket at start: capacity doubles as burst size.
                tokens: capacity,
                last: Instant::now(),
            }),
            held: AtomicUsize::new(0),
            peak_held: AtomicUsize::new(0),
        }
    }

    /// Block until a concurrency slot is free, then hold it. The returned
    /// permit gives the slot back on drop, exactly once, on every path.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<RatePermit<'_>, LimiterError> {
        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(LimiterError::Cancelled),
            acquired = self.semaphore.clone().acquire_owned() => {
                acquired.map_err(|_| LimiterError::Closed)?
            }
        };

        let held = self.held.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_held.fetch_max(held, Ordering::SeqCst);

        Ok(RatePermit {
            _permit: permit,
            limiter: self,
        })
    }

    /// Block until the request-rate budget has a spendable unit, then
    /// spend it. Sleeps in short slices so a stop request interrupts the
    /// wait instead of one long sleep absorbing it.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), LimiterError> {
        loop {
            let sleep_for = {
                let mut bucket = self.bucket.lock().await;
                bucket.refill(Instant::now());
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                let deficit = (1.0 - bucket.tokens) / bucket.rate;
                Duration::from_secs_f64(deficit).min(MAX_SLEEP_SLICE)
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(LimiterError::Cancelled),
                _ = time::sleep(sleep_for) => {}
            }
        }
    }

    /// Currently held concurrency slots.
    pub fn held(&self) -> usize {
        self.held.load(Ordering::SeqCst)
    }

    /// High-water mark of simultaneously held slots over the run.
    pub fn peak_held(&self) -> usize {
        self.peak_held.load(Ordering::SeqCst)
    }
}

/// An acquired concurrency slot.
pub struct RatePermit<'a> {
    _permit: OwnedSemaphorePermit,
    limiter: &'a RateLimiter,
}

impl Drop for RatePermit<'_> {
    fn drop(&mut self) {
        self.limiter.held.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(concurrency: usize, rps: f64, rpm: f64) -> EngineConfig {
        EngineConfig {
            max_concurrency: concurrency,
            requests_per_second: rps,
            requests_per_minute: rpm,
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_bound() {
        let limiter = Arc::new(RateLimiter::new(&config(3, 1_000.0, 60_000.0)));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..12 {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire(&cancel).await.unwrap();
                limiter.wait(&cancel).await.unwrap();
                time::sleep(Duration::from_millis(10)).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(limiter.peak_held() <= 3, "peak {}", limiter.peak_held());
        assert_eq!(limiter.held(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn throughput_is_rate_bounded() {
        // Burst of 20, then 20 per second: 25 sequential spends need at
        // least (25 - 20) / 20 = 250ms.
        let limiter = RateLimiter::new(&config(1, 20.0, 100_000.0));
        let cancel = CancellationToken::new();

        let start = Instant::now();
        for _ in 0..25 {
            limiter.wait(&cancel).await.unwrap();
        }
        assert!(
            start.elapsed() >= Duration::from_millis(245),
            "took {:?}",
            start.elapsed()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_observes_cancellation() {
        // Drain the one-token burst, then cancel mid-wait.
        let limiter = Arc::new(RateLimiter::new(&config(1, 1.0, 60.0)));
        let cancel = CancellationToken::new();
        limiter.wait(&cancel).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.wait(&cancel).await })
        };
        time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(LimiterError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_observes_cancellation() {
        let limiter = Arc::new(RateLimiter::new(&config(1, 100.0, 6_000.0)));
        let cancel = CancellationToken::new();
        let held = limiter.acquire(&cancel).await.unwrap();

        let blocked = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await.map(|_| ()) })
        };
        time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        assert!(matches!(blocked.await.unwrap(), Err(LimiterError::Cancelled)));
        drop(held);
        assert_eq!(limiter.held(), 0);
    }
}

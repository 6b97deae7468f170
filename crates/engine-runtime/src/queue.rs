use model::context::QueuedContext;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::{self, Duration, Instant};

#[derive(Debug, Default)]
struct Lanes {
    high: VecDeque<QueuedContext>,
    normal: VecDeque<QueuedContext>,
}

/// Two-lane work queue shared by the pump, the workers and the committer.
///
/// The normal lane is bounded and exerts backpressure on the pump, which
/// keeps the initial chunking lazy. The high lane (retries and splits) is
/// unbounded: the committer pushes into it synchronously and must never
/// block behind a full queue, or requeueing could deadlock the drain.
#[derive(Debug)]
pub struct ContextQueue {
    lanes: Mutex<Lanes>,
    normal_capacity: usize,
    items: Notify,
    space: Notify,
}

impl ContextQueue {
    pub fn new(normal_capacity: usize) -> Self {
        ContextQueue {
            lanes: Mutex::new(Lanes::default()),
            normal_capacity,
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lanes> {
        self.lanes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a retry or split context. Never blocks.
    pub fn push_high(&self, qc: QueuedContext) {
        self.lock().high.push_back(qc);
        self.items.notify_one();
    }

    /// Enqueue a first-pass context, waiting for a free slot in the
    /// bounded normal lane.
    pub async fn push_normal(&self, qc: QueuedContext) {
        let mut item = qc;
        loop {
            match self.try_push_normal(item) {
                Ok(()) => return,
                Err(back) => {
                    item = back;
                    self.space.notified().await;
                }
            }
        }
    }

    fn try_push_normal(&self, qc: QueuedContext) -> Result<(), QueuedContext> {
        let mut lanes = self.lock();
        if lanes.normal.len() >= self.normal_capacity {
            return Err(qc);
        }
        lanes.normal.push_back(qc);
        drop(lanes);
        self.items.notify_one();
        Ok(())
    }

    fn try_pop(&self) -> Option<QueuedContext> {
        let mut lanes = self.lock();
        if let Some(qc) = lanes.high.pop_front() {
            return Some(qc);
        }
        let qc = lanes.normal.pop_front();
        drop(lanes);
        if qc.is_some() {
            self.space.notify_one();
        }
        qc
    }

    /// Take the next context, high lane first, waiting up to `wait` for one
    /// to arrive. `None` is the caller's cue to check the drain predicate.
    pub async fn pop(&self, wait: Duration) -> Option<QueuedContext> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(qc) = self.try_pop() {
                return Some(qc);
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return self.try_pop();
            };
            if time::timeout(remaining, self.items.notified()).await.is_err() {
                return self.try_pop();
            }
        }
    }

    pub fn len(&self) -> usize {
        let lanes = self.lock();
        lanes.high.len() + lanes.normal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

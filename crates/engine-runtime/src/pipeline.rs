use crate::{error::PipelineError, queue::ContextQueue};
use futures::{StreamExt, stream::FuturesUnordered};

use engine_core::{
    config::EngineConfig,
    limiter::RateLimiter,
    metrics::Metrics,
    progress::ProgressTracker,
    state::CommitSink,
};
use engine_processing::{
    error::TranslateError,
    scheduler::Scheduler,
    task::BatchTranslator,
};
use model::{
    context::{QueuedContext, TaskContext},
    progress::ProgressSnapshot,
    report::TaskReport,
    unit::UnitStatus,
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One executed context on its way to the committer.
struct CommitPayload {
    context: TaskContext,
    outcome: Result<TaskReport, TranslateError>,
}

/// State shared by the tasks of a single run.
struct RunState {
    queue: ContextQueue,
    /// Contexts popped but not yet folded in by the committer. Part of the
    /// drain predicate: covers both the executing and the commit-queued
    /// window, so a result awaiting commit can never look like completion.
    pending: AtomicUsize,
    producer_done: AtomicBool,
}

/// Decrements the pending count on drop unless the result reached the
/// committer, which then owns the decrement. Keeps the drain predicate
/// honest on early exits and when a translator panics mid-context.
struct PendingGuard<'a> {
    pending: &'a AtomicUsize,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    fn arm(pending: &'a AtomicUsize) -> Self {
        pending.fetch_add(1, Ordering::SeqCst);
        PendingGuard {
            pending,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// The orchestration core: chunking producer, rate-limited worker pool and
/// a single committer, wired through the priority queue.
///
/// Topology per run:
///
/// * a producer thread walks the scheduler's initial chunking and feeds a
///   bounded channel (chunking is sync and lazy, so it gets its own OS
///   thread rather than a blocking spot on the runtime);
/// * a pump task relays the feed into the queue's normal lane;
/// * N workers pop contexts, pass the rate limiter, call the translator
///   and hand results to the commit channel;
/// * the committer task requeues follow-ups, persists finalized units and
///   publishes progress. It is the only writer of progress state.
#[derive(Clone)]
pub struct Pipeline {
    scheduler: Arc<Scheduler>,
    translator: Arc<dyn BatchTranslator>,
    sink: Arc<dyn CommitSink>,
    limiter: Arc<RateLimiter>,
    metrics: Metrics,
    cancel: CancellationToken,
    progress_tx: watch::Sender<ProgressSnapshot>,
    progress_rx: watch::Receiver<ProgressSnapshot>,
    config: EngineConfig,
}

impl Pipeline {
    pub fn new(
        scheduler: Arc<Scheduler>,
        translator: Arc<dyn BatchTranslator>,
        sink: Arc<dyn CommitSink>,
        config: EngineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let limiter = Arc::new(RateLimiter::new(&config));
        let (progress_tx, progress_rx) =
            watch::channel(ProgressSnapshot::empty(scheduler.trackable_units() as u64));

        Ok(Pipeline {
            scheduler,
            translator,
            sink,
            limiter,
            metrics: Metrics::new(),
            cancel: CancellationToken::new(),
            progress_tx,
            progress_rx,
            config,
        })
    }

    /// Watch endpoint for live progress; holds the latest snapshot.
    pub fn progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress_rx.clone()
    }

    pub fn metrics(&self) -> Metrics {
        self.metrics.clone()
    }

    pub fn limiter(&self) -> Arc<RateLimiter> {
        self.limiter.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Request a cooperative stop. Running requests finish and their
    /// results are still committed; queued work is abandoned.
    pub fn stop(&self) {
        info!("Stop requested");
        self.cancel.cancel();
    }

    /// Drive the run to completion and return the final snapshot. Completes
    /// when every unit is terminal or a stop request has drained the
    /// in-flight work.
    pub async fn run(&self) -> Result<ProgressSnapshot, PipelineError> {
        let workers = self.config.effective_concurrency();
        info!(
            units = self.scheduler.total_units(),
            workers,
            threshold = self.config.token_threshold,
            "Starting translation pipeline"
        );

        let state = Arc::new(RunState {
            queue: ContextQueue::new(self.config.queue_capacity),
            pending: AtomicUsize::new(0),
            producer_done: AtomicBool::new(false),
        });

        let (feed_tx, feed_rx) = mpsc::channel(self.config.feed_capacity);
        let producer = self.spawn_producer(feed_tx)?;
        let pump = tokio::spawn(self.clone().pump(feed_rx, state.clone()));

        let (commit_tx, commit_rx) = mpsc::channel(self.config.commit_capacity);
        let committer = tokio::spawn(self.clone().committer(commit_rx, state.clone()));

        let mut worker_handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            worker_handles.push(tokio::spawn(self.clone().worker(
                worker_id,
                state.clone(),
                commit_tx.clone(),
            )));
        }
        // The workers hold the only commit senders: the channel closes when
        // the last one exits, which is what lets the committer finish.
        drop(commit_tx);

        // Joins are observed as they complete so the first failed worker
        // flips the run into stopping while the others are still alive.
        let mut join_failure = None;
        let mut worker_joins: FuturesUnordered<_> = worker_handles.into_iter().collect();
        while let Some(exit) = worker_joins.next().await {
            if let Err(err) = exit {
                error!(error = %err, "Worker task failed, stopping the run");
                self.cancel.cancel();
                join_failure.get_or_insert(err);
            }
        }

        let snapshot = committer.await?;

        let translator = self.translator.clone();
        if time::timeout(self.config.shutdown_timeout(), translator.close())
            .await
            .is_err()
        {
            warn!("Translator cleanup exceeded the shutdown timeout");
        }

        pump.await?;
        let producer_exit = tokio::task::spawn_blocking(move || producer.join()).await?;
        if producer_exit.is_err() {
            return Err(PipelineError::ProducerPanicked);
        }

        if let Some(err) = join_failure {
            return Err(PipelineError::TaskJoin(err));
        }

        info!(
            processed = snapshot.processed,
            errored = snapshot.errored,
            total = snapshot.total,
            elapsed_secs = snapshot.elapsed_secs,
            "Pipeline run complete"
        );
        Ok(snapshot)
    }

    fn spawn_producer(
        &self,
        feed_tx: mpsc::Sender<QueuedContext>,
    ) -> Result<std::thread::JoinHandle<()>, PipelineError> {
        let scheduler = self.scheduler.clone();
        let cancel = self.cancel.clone();
        let handle = std::thread::Builder::new()
            .name("context-producer".into())
            .spawn(move || {
                for qc in scheduler.initial_contexts() {
                    if cancel.is_cancelled() {
                        break;
                    }
                    if feed_tx.blocking_send(qc).is_err() {
                        break;
                    }
                }
                // Dropping the sender closes the feed; the close is the
                // producer-done signal, there is no separate sentinel.
            })?;
        Ok(handle)
    }

    /// Sole reader of the feed channel. Relays first-pass contexts into the
    /// queue's bounded normal lane, then marks the producer done.
    async fn pump(self, mut feed_rx: mpsc::Receiver<QueuedContext>, state: Arc<RunState>) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = feed_rx.recv() => next,
            };
            let Some(qc) = next else { break };
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = state.queue.push_normal(qc) => {}
            }
        }
        state.producer_done.store(true, Ordering::SeqCst);
        debug!("Context feed drained");
    }

    async fn worker(
        self,
        id: usize,
        state: Arc<RunState>,
        commit_tx: mpsc::Sender<CommitPayload>,
    ) {
        let poll = self.config.poll_interval();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let Some(qc) = state.queue.pop(poll).await else {
                if state.producer_done.load(Ordering::SeqCst)
                    && self.scheduler.should_stop(
                        state.queue.len(),
                        state.pending.load(Ordering::SeqCst),
                    )
                {
                    break;
                }
                continue;
            };

            // Pending from pop until the committer folds the result in.
            let guard = PendingGuard::arm(&state.pending);

            let permit = match self.limiter.acquire(&self.cancel).await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if self.limiter.wait(&self.cancel).await.is_err() {
                drop(permit);
                break;
            }

            debug!(
                worker = id,
                units = qc.context.batch.len(),
                tokens = qc.context.token_total(),
                retry = qc.context.retry_count,
                split = qc.context.split_count,
                "Dispatching batch"
            );
            let outcome = self.translator.translate(&qc.context).await;
            drop(permit);

            if let Err(err) = &outcome {
                self.metrics.increment_failures(1);
                warn!(
                    worker = id,
                    units = qc.context.batch.len(),
                    error = %err,
                    "Batch request failed"
                );
            }

            let payload = CommitPayload {
                context: qc.context,
                outcome,
            };
            if commit_tx.send(payload).await.is_err() {
                error!(worker = id, "Commit channel closed with a result in flight");
                break;
            }
            guard.disarm();
        }

        self.translator.close().await;
        debug!(worker = id, "Worker exited");
    }

    /// Single consumer of the commit channel. Requeues follow-up work,
    /// persists finalized units and publishes progress, in that order:
    /// follow-ups must be visible in the queue before the pending count
    /// drops, or an idle worker could mistake mid-narrowing for a drained
    /// pipeline.
    async fn committer(
        self,
        mut commit_rx: mpsc::Receiver<CommitPayload>,
        state: Arc<RunState>,
    ) -> ProgressSnapshot {
        let mut tracker = ProgressTracker::new(self.scheduler.trackable_units() as u64);
        let mut commits = 0u64;

        while let Some(payload) = commit_rx.recv().await {
            commits += 1;

            for qc in self.scheduler.handle_failed_context(&payload.context) {
                if qc.context.retry_count > 0 {
                    self.metrics.increment_retries(1);
                } else {
                    self.metrics.increment_splits(1);
                }
                state.queue.push_high(qc);
            }

            let finalized = payload.context.finalized();
            let report = payload.outcome.unwrap_or_default();
            for unit in &finalized {
                match unit.status() {
                    UnitStatus::Processed => self.metrics.increment_processed(1),
                    UnitStatus::Error => self.metrics.increment_errored(1),
                    _ => {}
                }
            }
            self.metrics.increment_batches(1);
            self.metrics.add_token_usage(report.input_tokens, report.output_tokens);

            tracker.apply_commit(&finalized, &report);
            if self.config.reconcile_every != 0 && commits % self.config.reconcile_every == 0 {
                tracker.reconcile(self.scheduler.units());
            }
            let snapshot = tracker.snapshot();

            if !finalized.is_empty() || !report.new_terms.is_empty() {
                if let Err(err) = self
                    .sink
                    .persist(&finalized, &report.new_terms, &snapshot)
                    .await
                {
                    error!(error = %err, "Commit persistence failed, stopping the run");
                    self.cancel.cancel();
                }
            }
            let _ = self.progress_tx.send(snapshot);

            state.pending.fetch_sub(1, Ordering::SeqCst);
        }

        tracker.reconcile(self.scheduler.units());
        let snapshot = tracker.snapshot();
        let _ = self.progress_tx.send(snapshot.clone());
        snapshot
    }
}

use async_trait::async_trait;
use engine_core::config::EngineConfig;
use engine_processing::{error::TranslateError, task::BatchTranslator};
use model::{
    context::TaskContext,
    report::{GlossaryTerm, TaskReport},
    unit::{Unit, UnitId, UnitStatus},
};
use std::collections::HashMap;
use std::sync::{
    Mutex, Once,
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
};
use std::sync::Arc;
use tokio::time::Duration;

static TRACING: Once = Once::new();

/// Install a subscriber honoring `RUST_LOG`; safe to call from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// `n` pending units in one source file.
pub fn units_in_file(n: usize, file: &str) -> Vec<Arc<Unit>> {
    (0..n)
        .map(|i| Unit::new(format!("line {i} of {file}."), file, 10).shared())
        .collect()
}

/// `n` pending units, each in its own source file. Chunking never mixes
/// files, so this pins the batch layout to one unit per batch.
pub fn units_one_per_file(n: usize) -> Vec<Arc<Unit>> {
    (0..n)
        .map(|i| Unit::new(format!("line {i}."), format!("file-{i}.txt"), 10).shared())
        .collect()
}

pub fn fast_config() -> EngineConfig {
    EngineConfig {
        max_concurrency: 3,
        requests_per_second: 1_000.0,
        requests_per_minute: 60_000.0,
        token_threshold: 80,
        poll_interval_ms: 10,
        ..Default::default()
    }
}

/// Scriptable translator for pipeline tests.
///
/// Failure injection mirrors the two real failure modes: transport errors
/// (the whole call returns `Err`, no unit is touched) and validation
/// failures (the call returns `Ok` but scripted units stay at `None`).
pub struct ScriptedTranslator {
    delay: Duration,
    transport_failures: AtomicU32,
    validation_failures: Mutex<HashMap<UnitId, u32>>,
    term: Option<GlossaryTerm>,
    term_emitted: AtomicBool,
    calls: AtomicU64,
}

impl ScriptedTranslator {
    pub fn new() -> Self {
        ScriptedTranslator {
            delay: Duration::ZERO,
            transport_failures: AtomicU32::new(0),
            validation_failures: Mutex::new(HashMap::new()),
            term: None,
            term_emitted: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The first `n` calls fail at the transport level.
    pub fn fail_transport_first(self, n: u32) -> Self {
        self.transport_failures.store(n, Ordering::SeqCst);
        self
    }

    /// The unit fails validation on its next `times` appearances.
    pub fn fail_unit(self, unit: &Arc<Unit>, times: u32) -> Self {
        self.validation_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(unit.id(), times);
        self
    }

    pub fn fail_each_once(self, units: &[Arc<Unit>]) -> Self {
        {
            let mut failures = self
                .validation_failures
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            for unit in units {
                failures.insert(unit.id(), 1);
            }
        }
        self
    }

    /// Emit one glossary term with the first successful call.
    pub fn with_term(mut self, term: GlossaryTerm) -> Self {
        self.term = Some(term);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_transport_failure(&self) -> bool {
        self.transport_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn take_validation_failure(&self, id: &UnitId) -> bool {
        let mut failures = self
            .validation_failures
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match failures.get_mut(id) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        }
    }
}

impl Default for ScriptedTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BatchTranslator for ScriptedTranslator {
    async fn translate(&self, ctx: &TaskContext) -> Result<TaskReport, TranslateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.take_transport_failure() {
            return Err(TranslateError::Transport("injected outage".into()));
        }

        let mut processed = 0;
        for unit in &ctx.batch {
            if self.take_validation_failure(&unit.id()) {
                continue;
            }
            unit.set_dst(format!("<{}>", unit.src()));
            unit.set_status(UnitStatus::Processed);
            processed += 1;
        }

        let mut new_terms = Vec::new();
        if let Some(term) = &self.term
            && processed > 0
            && !self.term_emitted.swap(true, Ordering::SeqCst)
        {
            new_terms.push(term.clone());
        }

        Ok(TaskReport {
            processed,
            errors: 0,
            input_tokens: ctx.token_total() as u64,
            output_tokens: ctx.token_total() as u64,
            new_terms,
        })
    }
}

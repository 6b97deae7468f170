use crate::{error::SinkError, state::CommitSink, state::models::UnitRecord};
use async_trait::async_trait;
use model::{progress::ProgressSnapshot, report::GlossaryTerm, unit::Unit};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-memory commit sink for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, UnitRecord>,
    terms: Vec<GlossaryTerm>,
    last_progress: Option<ProgressSnapshot>,
    commits: u64,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).records.len()
    }

    pub fn commit_count(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).commits
    }

    pub fn terms(&self) -> Vec<GlossaryTerm> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .terms
            .clone()
    }

    pub fn last_progress(&self) -> Option<ProgressSnapshot> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last_progress
            .clone()
    }

    pub fn records(&self) -> Vec<UnitRecord> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .records
            .values()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CommitSink for MemorySink {
    async fn persist(
        &self,
        units: &[Arc<Unit>],
        terms: &[GlossaryTerm],
        progress: &ProgressSnapshot,
    ) -> Result<(), SinkError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for unit in units {
            inner
                .records
                .insert(unit.id().to_string(), UnitRecord::from_unit(unit));
        }
        inner.terms.extend(terms.iter().cloned());
        inner.last_progress = Some(progress.clone());
        inner.commits += 1;
        Ok(())
    }
}

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Lifecycle status of a translatable unit.
///
/// The orchestrator only ever reads `None` units into batches and only ever
/// writes `Processed` or `Error`. `Excluded` and `Duplicated` are assigned
/// upstream by the file parsers and never change afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitStatus {
    /// Untranslated, eligible for batching.
    None,
    /// Translation accepted.
    Processed,
    /// Forced-accept fallback after exhausted retries.
    Error,
    /// Excluded upstream (preservation rules, non-text rows, ...).
    Excluded,
    /// Duplicate of another unit, resolved upstream.
    Duplicated,
}

impl UnitStatus {
    /// Terminal states assigned by the file parsers, never by the engine.
    pub fn is_excluded(&self) -> bool {
        matches!(self, UnitStatus::Excluded | UnitStatus::Duplicated)
    }

    /// States the committer persists. Once reached, a unit never goes back
    /// to `None`.
    pub fn is_final(&self) -> bool {
        !matches!(self, UnitStatus::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitId(Uuid);

impl UnitId {
    pub fn new() -> Self {
        UnitId(Uuid::new_v4())
    }
}

impl Default for UnitId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UnitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug)]
struct UnitState {
    status: UnitStatus,
    dst: Option<String>,
    retries: u32,
}

/// One translatable line/paragraph/cell of source text.
///
/// Units are owned by the surrounding project store and shared across the
/// scheduler, workers and committer as `Arc<Unit>`; the mutable lifecycle
/// state lives behind an `RwLock` so the executor can mark terminal
/// statuses while the committer reads them.
#[derive(Debug)]
pub struct Unit {
    id: UnitId,
    src: String,
    file: String,
    tokens: usize,
    state: RwLock<UnitState>,
}

impl Unit {
    pub fn new(src: impl Into<String>, file: impl Into<String>, tokens: usize) -> Self {
        Unit {
            id: UnitId::new(),
            src: src.into(),
            file: file.into(),
            tokens,
            state: RwLock::new(UnitState {
                status: UnitStatus::None,
                dst: None,
                retries: 0,
            }),
        }
    }

    /// Convenience constructor estimating the token count from the text.
    pub fn from_text(src: impl Into<String>, file: impl Into<String>) -> Self {
        let src = src.into();
        let tokens = approx_tokens(&src);
        Self::new(src, file, tokens)
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    /// Grouping key: units from different files never share a batch.
    pub fn file_key(&self) -> &str {
        &self.file
    }

    pub fn token_estimate(&self) -> usize {
        self.tokens
    }

    pub fn status(&self) -> UnitStatus {
        self.state.read().unwrap_or_else(|e| e.into_inner()).status
    }

    pub fn set_status(&self, status: UnitStatus) {
        self.state.write().unwrap_or_else(|e| e.into_inner()).status = status;
    }

    pub fn dst(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .dst
            .clone()
    }

    pub fn set_dst(&self, dst: impl Into<String>) {
        self.state.write().unwrap_or_else(|e| e.into_inner()).dst = Some(dst.into());
    }

    /// Cumulative single-unit retry count, bumped by the scheduler each
    /// time this unit is re-dispatched alone.
    pub fn retries(&self) -> u32 {
        self.state.read().unwrap_or_else(|e| e.into_inner()).retries
    }

    pub fn bump_retries(&self) -> u32 {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.retries += 1;
        state.retries
    }
}

/// Rough token estimate for hosts without a vendor tokenizer: one token
/// per four characters, at least one per unit.
pub fn approx_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_explicit() {
        let unit = Unit::from_text("hello world", "a.txt");
        assert_eq!(unit.status(), UnitStatus::None);
        assert!(!unit.status().is_final());

        unit.set_dst("bonjour le monde");
        unit.set_status(UnitStatus::Processed);
        assert!(unit.status().is_final());
        assert_eq!(unit.dst().as_deref(), Some("bonjour le monde"));
    }

    #[test]
    fn excluded_states_are_terminal_exclusions() {
        assert!(UnitStatus::Excluded.is_excluded());
        assert!(UnitStatus::Duplicated.is_excluded());
        assert!(!UnitStatus::Error.is_excluded());
    }

    #[test]
    fn retry_counter_accumulates() {
        let unit = Unit::from_text("line", "a.txt");
        assert_eq!(unit.retries(), 0);
        assert_eq!(unit.bump_retries(), 1);
        assert_eq!(unit.bump_retries(), 2);
    }
}

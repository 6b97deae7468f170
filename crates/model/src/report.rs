use serde::{Deserialize, Serialize};

/// A glossary pairing mined by the executor out of a model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryTerm {
    pub source: String,
    pub target: String,
    pub comment: Option<String>,
}

/// Structured outcome of one executed task.
///
/// The executor is responsible for marking each batch unit's terminal
/// status before returning; the report only carries the aggregate
/// accounting the committer folds into the progress snapshot.
#[derive(Debug, Clone, Default)]
pub struct TaskReport {
    pub processed: usize,
    pub errors: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub new_terms: Vec<GlossaryTerm>,
}

impl TaskReport {
    pub fn merge(&mut self, other: &TaskReport) {
        self.processed += other.processed;
        self.errors += other.errors;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.new_terms.extend(other.new_terms.iter().cloned());
    }
}

use model::unit::{Unit, UnitStatus};
use std::sync::Arc;

/// Punctuation a lookback candidate must end with: continuity context has
/// to be sentence-complete.
const SENTENCE_FINAL: &[char] = &['.', '!', '?', '…', '。', '！', '？'];

/// Minimum derived line ceiling, whatever the token ceiling.
const MIN_LINES_PER_BATCH: usize = 8;

fn ends_sentence(text: &str) -> bool {
    text.chars()
        .next_back()
        .is_some_and(|c| SENTENCE_FINAL.contains(&c))
}

/// One emitted request batch plus its preceding continuity context.
#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub batch: Vec<Arc<Unit>>,
    pub lookback: Vec<Arc<Unit>>,
}

/// Lazily groups untranslated units into token/line-bounded batches.
///
/// Walks the units in original order, skipping anything not at `None`. A
/// batch closes when the next unit would exceed the derived line ceiling
/// (`max(8, token_ceiling / 16)`) or the token ceiling, or belongs to a
/// different source file. The first unit of a batch is exempt from the
/// ceilings so one oversized unit can never wedge the walk.
#[derive(Debug)]
pub struct Chunker {
    units: Vec<Arc<Unit>>,
    token_ceiling: usize,
    lookback_limit: usize,
    pos: usize,
}

impl Chunker {
    pub fn new(units: Vec<Arc<Unit>>, token_ceiling: usize, lookback_limit: usize) -> Self {
        Chunker {
            units,
            token_ceiling: token_ceiling.max(1),
            lookback_limit,
            pos: 0,
        }
    }

    fn line_ceiling(&self) -> usize {
        (self.token_ceiling / 16).max(MIN_LINES_PER_BATCH)
    }

    /// Walk backward from the unit preceding the batch, collecting up to
    /// the configured number of sentence-complete same-file candidates.
    /// The walk stops entirely at the first candidate that is not
    /// sentence-final; empty, foreign-file and excluded units are skipped.
    fn lookback_for(&self, batch_start: usize, file: &str) -> Vec<Arc<Unit>> {
        let mut collected = Vec::new();
        if self.lookback_limit == 0 {
            return collected;
        }

        for idx in (0..batch_start).rev() {
            let unit = &self.units[idx];
            let text = unit.src().trim();
            if text.is_empty() || unit.file_key() != file || unit.status().is_excluded() {
                continue;
            }
            if !ends_sentence(text) {
                break;
            }
            collected.push(unit.clone());
            if collected.len() >= self.lookback_limit {
                break;
            }
        }

        collected.reverse(); // oldest first
        collected
    }

    fn plan(&self, batch: Vec<Arc<Unit>>, batch_start: usize) -> ChunkPlan {
        let file = batch[0].file_key().to_string();
        let lookback = self.lookback_for(batch_start, &file);
        ChunkPlan { batch, lookback }
    }
}

impl Iterator for Chunker {
    type Item = ChunkPlan;

    fn next(&mut self) -> Option<ChunkPlan> {
        let line_ceiling = self.line_ceiling();
        let mut batch: Vec<Arc<Unit>> = Vec::new();
        let mut batch_start = 0;
        let mut tokens = 0;

        while self.pos < self.units.len() {
            let idx = self.pos;
            let unit = self.units[idx].clone();

            if unit.status() != UnitStatus::None {
                self.pos += 1;
                continue;
            }

            if batch.is_empty() {
                // The opening unit is never rejected, even oversized.
                batch_start = idx;
                tokens = unit.token_estimate();
                batch.push(unit);
                self.pos += 1;
                continue;
            }

            let closes = unit.file_key() != batch[0].file_key()
                || batch.len() + 1 > line_ceiling
                || tokens + unit.token_estimate() > self.token_ceiling;
            if closes {
                // Leave the unit for the next batch.
                return Some(self.plan(batch, batch_start));
            }

            tokens += unit.token_estimate();
            batch.push(unit);
            self.pos += 1;
        }

        if batch.is_empty() {
            None
        } else {
            // Trailing partial batch.
            Some(self.plan(batch, batch_start))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn unit(text: &str, file: &str, tokens: usize) -> Arc<Unit> {
        Unit::new(text, file, tokens).shared()
    }

    #[test]
    fn empty_input_yields_no_batches() {
        let mut chunker = Chunker::new(vec![], 100, 4);
        assert!(chunker.next().is_none());
    }

    #[test]
    fn covers_every_pending_unit_exactly_once() {
        let units: Vec<Arc<Unit>> = (0..40)
            .map(|i| unit(&format!("line {i}."), "a.txt", 10))
            .collect();
        units[3].set_status(UnitStatus::Excluded);
        units[17].set_status(UnitStatus::Processed);

        let mut seen = HashSet::new();
        for plan in Chunker::new(units.clone(), 100, 0) {
            for u in &plan.batch {
                assert_eq!(u.status(), UnitStatus::None);
                assert!(seen.insert(u.id()), "unit batched twice");
            }
        }
        assert_eq!(seen.len(), 38);
        assert!(!seen.contains(&units[3].id()));
        assert!(!seen.contains(&units[17].id()));
    }

    #[test]
    fn batches_never_mix_files() {
        let units = vec![
            unit("a.", "one.txt", 5),
            unit("b.", "one.txt", 5),
            unit("c.", "two.txt", 5),
            unit("d.", "two.txt", 5),
        ];
        let plans: Vec<_> = Chunker::new(units, 1_000, 0).collect();
        assert_eq!(plans.len(), 2);
        for plan in &plans {
            let file = plan.batch[0].file_key().to_string();
            assert!(plan.batch.iter().all(|u| u.file_key() == file));
        }
    }

    #[test]
    fn respects_token_ceiling_except_oversized_opener() {
        let units = vec![
            unit("huge", "a.txt", 500),
            unit("small.", "a.txt", 10),
            unit("small.", "a.txt", 10),
        ];
        let plans: Vec<_> = Chunker::new(units, 100, 0).collect();
        // The oversized unit opens (and closes) its own batch.
        assert_eq!(plans[0].batch.len(), 1);
        assert_eq!(plans[0].batch[0].token_estimate(), 500);
        assert_eq!(plans[1].batch.len(), 2);
        for plan in &plans[1..] {
            let total: usize = plan.batch.iter().map(|u| u.token_estimate()).sum();
            assert!(total <= 100);
        }
    }

    #[test]
    fn derived_line_ceiling_bounds_batch_length() {
        // Ceiling 64 tokens -> line ceiling max(8, 4) = 8.
        let units: Vec<Arc<Unit>> = (0..20)
            .map(|i| unit(&format!("l{i}."), "a.txt", 1))
            .collect();
        for plan in Chunker::new(units, 64, 0) {
            assert!(plan.batch.len() <= 8);
        }
    }

    #[test]
    fn lookback_is_sentence_complete_contiguous_oldest_first() {
        let units = vec![
            unit("First sentence.", "a.txt", 5),
            unit("dangling line", "a.txt", 5), // stops the backward walk
            unit("Second sentence.", "a.txt", 5),
            unit("Third sentence!", "a.txt", 5),
            unit("target", "a.txt", 5),
        ];
        for u in &units[0..4] {
            u.set_status(UnitStatus::Processed);
        }

        let plan = Chunker::new(units.clone(), 1_000, 10).next().unwrap();
        assert_eq!(plan.batch.len(), 1);
        let texts: Vec<_> = plan.lookback.iter().map(|u| u.src()).collect();
        // Walk backward: "Third sentence!", "Second sentence." are taken,
        // the dangling line halts the walk before "First sentence.".
        assert_eq!(texts, vec!["Second sentence.", "Third sentence!"]);
    }

    #[test]
    fn lookback_skips_foreign_and_excluded_units() {
        let units = vec![
            unit("Keep me.", "a.txt", 5),
            unit("Other file.", "b.txt", 5),
            unit("Excluded.", "a.txt", 5),
            unit("target", "a.txt", 5),
        ];
        units[0].set_status(UnitStatus::Processed);
        units[1].set_status(UnitStatus::Processed);
        units[2].set_status(UnitStatus::Duplicated);

        let plan = Chunker::new(units, 1_000, 10).next().unwrap();
        let texts: Vec<_> = plan.lookback.iter().map(|u| u.src()).collect();
        assert_eq!(texts, vec!["Keep me."]);
    }

    #[test]
    fn lookback_respects_limit() {
        let mut units: Vec<Arc<Unit>> = (0..6)
            .map(|i| unit(&format!("Sentence {i}."), "a.txt", 5))
            .collect();
        for u in &units {
            u.set_status(UnitStatus::Processed);
        }
        units.push(unit("target", "a.txt", 5));

        let plan = Chunker::new(units, 1_000, 3).next().unwrap();
        assert_eq!(plan.lookback.len(), 3);
        // The three most recent, oldest first.
        assert_eq!(plan.lookback[0].src(), "Sentence 3.");
        assert_eq!(plan.lookback[2].src(), "Sentence 5.");
    }
}

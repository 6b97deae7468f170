use crate::{error::SinkError, state::CommitSink, state::models::UnitRecord};
use async_trait::async_trait;
use model::{progress::ProgressSnapshot, report::GlossaryTerm, unit::Unit, unit::UnitId};
use std::path::Path;
use std::sync::Arc;

/// Durable commit sink backed by sled.
///
/// The committer stays serialized; only the blocking batch write is
/// offloaded so the runtime is never parked on disk I/O.
pub struct SledCommitSink {
    db: sled::Db,
}

impl SledCommitSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, sled::Error> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    #[inline]
    fn unit_key(id: &UnitId) -> String {
        format!("unit:{id}")
    }

    #[inline]
    fn term_key(source: &str) -> String {
        format!("term:{source}")
    }

    const PROGRESS_KEY: &'static str = "progress";

    pub fn load_unit(&self, id: &UnitId) -> Result<Option<UnitRecord>, SinkError> {
        let bytes = self.db.get(Self::unit_key(id)).map_err(|e| SinkError::Persist {
            source: Box::new(e),
        })?;
        match bytes {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(|e| SinkError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn load_progress(&self) -> Result<Option<ProgressSnapshot>, SinkError> {
        let bytes = self
            .db
            .get(Self::PROGRESS_KEY)
            .map_err(|e| SinkError::Persist { source: Box::new(e) })?;
        match bytes {
            Some(bytes) => Ok(Some(
                bincode::deserialize(&bytes).map_err(|e| SinkError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub fn committed_units(&self) -> usize {
        self.db.scan_prefix("unit:").count()
    }
}

#[async_trait]
impl CommitSink for SledCommitSink {
    async fn persist(
        &self,
        units: &[Arc<Unit>],
        terms: &[GlossaryTerm],
        progress: &ProgressSnapshot,
    ) -> Result<(), SinkError> {
        let mut batch = sled::Batch::default();

        for unit in units {
            let record = UnitRecord::from_unit(unit);
            let bytes =
                bincode::serialize(&record).map_err(|e| SinkError::Serialization(e.to_string()))?;
            batch.insert(Self::unit_key(&record.id).as_str(), bytes);
        }
        for term in terms {
            let bytes =
                bincode::serialize(term).map_err(|e| SinkError::Serialization(e.to_string()))?;
            batch.insert(Self::term_key(&term.source).as_str(), bytes);
        }
        let progress_bytes =
            bincode::serialize(progress).map_err(|e| SinkError::Serialization(e.to_string()))?;
        batch.insert(Self::PROGRESS_KEY, progress_bytes);

        let db = self.db.clone();
        tokio::task::spawn_blocking(move || db.apply_batch(batch))
            .await
            .map_err(|e| SinkError::WorkerGone(e.to_string()))?
            .map_err(|e| SinkError::Persist { source: Box::new(e) })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::unit::UnitStatus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn persists_units_terms_and_progress() {
        let dir = tempdir().unwrap();
        let sink = SledCommitSink::open(dir.path()).unwrap();

        let unit = Unit::from_text("hello", "a.txt").shared();
        unit.set_dst("bonjour");
        unit.set_status(UnitStatus::Processed);

        let term = GlossaryTerm {
            source: "hello".into(),
            target: "bonjour".into(),
            comment: None,
        };
        let mut progress = ProgressSnapshot::empty(1);
        progress.processed = 1;

        sink.persist(&[unit.clone()], &[term], &progress)
            .await
            .unwrap();

        let record = sink.load_unit(&unit.id()).unwrap().unwrap();
        assert_eq!(record.status, UnitStatus::Processed);
        assert_eq!(record.dst.as_deref(), Some("bonjour"));
        assert_eq!(sink.committed_units(), 1);

        let loaded = sink.load_progress().unwrap().unwrap();
        assert_eq!(loaded.processed, 1);
        assert_eq!(loaded.total, 1);
    }

    #[tokio::test]
    async fn rewrites_are_idempotent_per_unit() {
        let dir = tempdir().unwrap();
        let sink = SledCommitSink::open(dir.path()).unwrap();

        let unit = Unit::from_text("line", "a.txt").shared();
        unit.set_status(UnitStatus::Error);
        unit.set_dst("line");

        let progress = ProgressSnapshot::empty(1);
        sink.persist(&[unit.clone()], &[], &progress).await.unwrap();
        sink.persist(&[unit.clone()], &[], &progress).await.unwrap();

        assert_eq!(sink.committed_units(), 1);
    }
}

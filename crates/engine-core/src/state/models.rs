use chrono::{DateTime, Utc};
use model::unit::{Unit, UnitId, UnitStatus};
use serde::{Deserialize, Serialize};

/// Durable row for one finalized unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    pub id: UnitId,
    pub file: String,
    pub src: String,
    pub dst: Option<String>,
    pub status: UnitStatus,
    pub committed_at: DateTime<Utc>,
}

impl UnitRecord {
    pub fn from_unit(unit: &Unit) -> Self {
        UnitRecord {
            id: unit.id(),
            file: unit.file_key().to_string(),
            src: unit.src().to_string(),
            dst: unit.dst(),
            status: unit.status(),
            committed_at: Utc::now(),
        }
    }
}

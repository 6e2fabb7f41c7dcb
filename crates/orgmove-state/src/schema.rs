//! Schema definitions for orgmove SurrealDB tables
//!
//! Tables:
//! - checkpoints: one row per plan digest holding the stage cursor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{CheckpointStatus, PlanDigest, StageCheckpoint};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Checkpoint row - the persisted stage cursor for one plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    /// Plan digest (SHA256 hex)
    pub plan_id: String,
    /// Highest completed stage index
    pub stage: u8,
    /// Status string: running | failed | succeeded | overridden | rolled_back
    pub status: String,
    /// Last stage-fatal error
    pub last_error: Option<String>,
    /// Last write timestamp
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRow {
    /// Build a row from the domain checkpoint.
    pub fn from_checkpoint(checkpoint: &StageCheckpoint) -> Self {
        CheckpointRow {
            id: None,
            plan_id: checkpoint.plan_id.as_str().to_string(),
            stage: checkpoint.stage,
            status: checkpoint.status.as_str().to_string(),
            last_error: checkpoint.last_error.clone(),
            updated_at: checkpoint.updated_at,
        }
    }

    /// Convert back into the domain checkpoint, validating every field.
    pub fn into_checkpoint(self) -> Result<StageCheckpoint, StorageError> {
        let plan_id = PlanDigest::try_from(self.plan_id)?;
        let status: CheckpointStatus = self.status.parse()?;
        let checkpoint = StageCheckpoint {
            plan_id,
            stage: self.stage,
            status,
            last_error: self.last_error,
            updated_at: self.updated_at,
        };
        crate::storage_traits::check_stage(&checkpoint)?;
        Ok(checkpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_round_trip_preserves_fields() {
        let cp = StageCheckpoint::new(PlanDigest::from_bytes(b"p"), 2, CheckpointStatus::Failed)
            .with_error("rate limited");
        let row = CheckpointRow::from_checkpoint(&cp);
        assert_eq!(row.status, "failed");
        assert!(row.id.is_none());

        let back = row.into_checkpoint().unwrap();
        assert_eq!(back, cp);
    }

    #[test]
    fn row_with_bad_status_is_rejected() {
        let cp = StageCheckpoint::new(PlanDigest::from_bytes(b"p"), 1, CheckpointStatus::Running);
        let mut row = CheckpointRow::from_checkpoint(&cp);
        row.status = "paused".to_string();
        assert!(matches!(
            row.into_checkpoint(),
            Err(StorageError::UnknownStatus(_))
        ));
    }

    #[test]
    fn row_with_out_of_range_stage_is_rejected() {
        let cp = StageCheckpoint::new(PlanDigest::from_bytes(b"p"), 1, CheckpointStatus::Running);
        let mut row = CheckpointRow::from_checkpoint(&cp);
        row.stage = 9;
        assert!(matches!(
            row.into_checkpoint(),
            Err(StorageError::InvalidStage { stage: 9, .. })
        ));
    }
}

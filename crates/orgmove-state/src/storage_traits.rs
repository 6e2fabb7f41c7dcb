//! Storage trait definitions for orgmove
//!
//! `CheckpointStore` persists the stage cursor of a migration run keyed by
//! the plan's digest, so a process crash mid-migration can be resumed
//! instead of losing track of a partially-moved device.
//!
//! The trait is async and backend-agnostic. An in-memory fake is provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Highest stage index a checkpoint may record (device added to the
/// destination network).
pub const MAX_STAGE_INDEX: u8 = 4;

// ---------------------------------------------------------------------------
// PlanDigest
// ---------------------------------------------------------------------------

/// Plan digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanDigest(String);

impl PlanDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        PlanDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for PlanDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(PlanDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for PlanDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Run status recorded alongside the stage cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Running,
    Failed,
    Succeeded,
    /// Operator asserted the devices were moved out-of-band.
    Overridden,
    RolledBack,
}

impl CheckpointStatus {
    /// Stable string form used by the database backend.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointStatus::Running => "running",
            CheckpointStatus::Failed => "failed",
            CheckpointStatus::Succeeded => "succeeded",
            CheckpointStatus::Overridden => "overridden",
            CheckpointStatus::RolledBack => "rolled_back",
        }
    }

    /// `true` when no further stage transition is expected for the plan.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CheckpointStatus::Succeeded | CheckpointStatus::Overridden | CheckpointStatus::RolledBack
        )
    }
}

impl std::str::FromStr for CheckpointStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(CheckpointStatus::Running),
            "failed" => Ok(CheckpointStatus::Failed),
            "succeeded" => Ok(CheckpointStatus::Succeeded),
            "overridden" => Ok(CheckpointStatus::Overridden),
            "rolled_back" => Ok(CheckpointStatus::RolledBack),
            other => Err(StorageError::UnknownStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable copy of a run's stage cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCheckpoint {
    /// Digest of the plan this checkpoint belongs to
    pub plan_id: PlanDigest,
    /// Highest completed stage, `0..=MAX_STAGE_INDEX`
    pub stage: u8,
    /// Run status at the time of the write
    pub status: CheckpointStatus,
    /// Last stage-fatal error, if any
    pub last_error: Option<String>,
    /// Time of the write
    pub updated_at: DateTime<Utc>,
}

impl StageCheckpoint {
    /// Build a checkpoint stamped with the current time.
    pub fn new(plan_id: PlanDigest, stage: u8, status: CheckpointStatus) -> Self {
        Self {
            plan_id,
            stage,
            status,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Attach the last stage-fatal error.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

/// Stage checkpoint persistence.
///
/// Guarantees:
/// - At most one checkpoint per plan digest; `save` replaces it.
/// - `stage` never exceeds [`MAX_STAGE_INDEX`]; `save` rejects larger values.
/// - `clear` is a no-op when nothing is stored.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert or replace the checkpoint for `checkpoint.plan_id`.
    async fn save(&self, checkpoint: &StageCheckpoint) -> StorageResult<()>;

    /// Load the checkpoint for a plan, if one was saved.
    async fn load(&self, plan_id: &PlanDigest) -> StorageResult<Option<StageCheckpoint>>;

    /// Remove the checkpoint for a plan.
    async fn clear(&self, plan_id: &PlanDigest) -> StorageResult<()>;

    /// List all checkpoints, most recently updated first.
    async fn list(&self) -> StorageResult<Vec<StageCheckpoint>>;
}

/// Reject stage indices beyond the last stage.
pub(crate) fn check_stage(checkpoint: &StageCheckpoint) -> StorageResult<()> {
    if checkpoint.stage > MAX_STAGE_INDEX {
        return Err(StorageError::InvalidStage {
            plan_id: checkpoint.plan_id.to_string(),
            stage: checkpoint.stage,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_and_hex() {
        let a = PlanDigest::from_bytes(b"plan");
        let b = PlanDigest::from_bytes(b"plan");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert_eq!(a.short().len(), 12);
    }

    #[test]
    fn digest_try_from_rejects_garbage() {
        let err = PlanDigest::try_from("not-hex".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDigest { .. }));
    }

    #[test]
    fn digest_try_from_lowercases() {
        let upper = "A".repeat(64);
        let digest = PlanDigest::try_from(upper).unwrap();
        assert_eq!(digest.as_str(), "a".repeat(64));
    }

    #[test]
    fn status_string_round_trip() {
        for status in [
            CheckpointStatus::Running,
            CheckpointStatus::Failed,
            CheckpointStatus::Succeeded,
            CheckpointStatus::Overridden,
            CheckpointStatus::RolledBack,
        ] {
            let parsed: CheckpointStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("paused".parse::<CheckpointStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!CheckpointStatus::Running.is_terminal());
        assert!(!CheckpointStatus::Failed.is_terminal());
        assert!(CheckpointStatus::RolledBack.is_terminal());
    }

    #[test]
    fn check_stage_bounds() {
        let digest = PlanDigest::from_bytes(b"x");
        assert!(check_stage(&StageCheckpoint::new(digest.clone(), 4, CheckpointStatus::Running)).is_ok());
        assert!(check_stage(&StageCheckpoint::new(digest, 5, CheckpointStatus::Running)).is_err());
    }
}

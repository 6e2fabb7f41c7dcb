//! SurrealDB-backed CheckpointStore implementation
//!
//! Uses `schema::CheckpointRow` for persistence, converting to/from
//! `storage_traits` types at the boundary.

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StorageError;
use crate::handle;
use crate::schema::CheckpointRow;
use crate::storage_traits::{
    check_stage, CheckpointStore, PlanDigest, StageCheckpoint, StorageResult,
};

/// SurrealDB-backed implementation of [`CheckpointStore`].
#[derive(Clone)]
pub struct SurrealCheckpointStore {
    db: Surreal<Any>,
}

impl SurrealCheckpointStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        let db = handle::connect_in_memory().await?;
        info!("SurrealCheckpointStore connected (in-memory)");
        Ok(Self { db })
    }

    /// Create from environment variables.
    ///
    /// See [`handle::connect_from_env`] for the resolution order.
    pub async fn from_env() -> crate::Result<Self> {
        let db = handle::connect_from_env().await?;
        info!("SurrealCheckpointStore connected");
        Ok(Self { db })
    }

    /// Wrap an already-connected database (schema must be initialised).
    pub fn from_db(db: Surreal<Any>) -> Self {
        Self { db }
    }

    async fn fetch_row(&self, plan_id: &str) -> StorageResult<Option<CheckpointRow>> {
        let pid = plan_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM checkpoints WHERE plan_id = $pid")
            .bind(("pid", pid))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<CheckpointRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl CheckpointStore for SurrealCheckpointStore {
    async fn save(&self, checkpoint: &StageCheckpoint) -> StorageResult<()> {
        check_stage(checkpoint)?;
        let row = CheckpointRow::from_checkpoint(checkpoint);
        let pid = checkpoint.plan_id.as_str().to_string();

        debug!(plan_id = %checkpoint.plan_id.short(), stage = checkpoint.stage, status = %checkpoint.status, "saving checkpoint");

        if self.fetch_row(&pid).await?.is_some() {
            self.db
                .query("UPDATE checkpoints CONTENT $row WHERE plan_id = $pid")
                .bind(("row", row))
                .bind(("pid", pid))
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?
                .check()
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        } else {
            let _created: Option<CheckpointRow> = self
                .db
                .create("checkpoints")
                .content(row)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))?;
        }

        Ok(())
    }

    async fn load(&self, plan_id: &PlanDigest) -> StorageResult<Option<StageCheckpoint>> {
        self.fetch_row(plan_id.as_str())
            .await?
            .map(CheckpointRow::into_checkpoint)
            .transpose()
    }

    async fn clear(&self, plan_id: &PlanDigest) -> StorageResult<()> {
        let pid = plan_id.as_str().to_string();
        self.db
            .query("DELETE checkpoints WHERE plan_id = $pid")
            .bind(("pid", pid))
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<StageCheckpoint>> {
        let mut res = self
            .db
            .query("SELECT * FROM checkpoints ORDER BY updated_at DESC")
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        let rows: Vec<CheckpointRow> = res
            .take(0)
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        rows.into_iter().map(CheckpointRow::into_checkpoint).collect()
    }
}

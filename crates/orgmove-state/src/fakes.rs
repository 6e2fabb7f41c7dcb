//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryCheckpointStore`, which satisfies the `CheckpointStore`
//! contract without any external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::storage_traits::*;

/// In-memory checkpoint store backed by a `HashMap<digest, checkpoint>`.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, StageCheckpoint>>,
    writes: Mutex<u64>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    pub fn write_count(&self) -> u64 {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, checkpoint: &StageCheckpoint) -> StorageResult<()> {
        crate::storage_traits::check_stage(checkpoint)?;
        let mut checkpoints = self.checkpoints.lock().unwrap();
        checkpoints.insert(checkpoint.plan_id.as_str().to_string(), checkpoint.clone());
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }

    async fn load(&self, plan_id: &PlanDigest) -> StorageResult<Option<StageCheckpoint>> {
        let checkpoints = self.checkpoints.lock().unwrap();
        Ok(checkpoints.get(plan_id.as_str()).cloned())
    }

    async fn clear(&self, plan_id: &PlanDigest) -> StorageResult<()> {
        let mut checkpoints = self.checkpoints.lock().unwrap();
        checkpoints.remove(plan_id.as_str());
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<StageCheckpoint>> {
        let checkpoints = self.checkpoints.lock().unwrap();
        let mut all: Vec<StageCheckpoint> = checkpoints.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }
}

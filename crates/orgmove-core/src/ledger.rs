//! Stage ledger: the per-run cursor of the highest completed stage.
//!
//! Owned by one run controller and lent to the orchestrator and rollback
//! controller by `&mut`. With a [`CheckpointStore`] attached, every
//! transition is also written durably; a failed write is reported to the
//! progress sink and the in-memory cursor stays authoritative.

use std::sync::Arc;

use orgmove_state::{CheckpointStatus, CheckpointStore, PlanDigest, StageCheckpoint};

use crate::domain::{EventDraft, LedgerError, Stage};
use crate::sink::ProgressSink;

pub struct StageLedger {
    plan_id: PlanDigest,
    stage: Stage,
    store: Option<Arc<dyn CheckpointStore>>,
}

impl StageLedger {
    /// Fresh in-memory ledger at [`Stage::None`].
    pub fn new(plan_id: PlanDigest) -> Self {
        Self {
            plan_id,
            stage: Stage::None,
            store: None,
        }
    }

    /// Persist every transition to `store`.
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Rebuild a ledger from the checkpoint saved for `plan_id`.
    ///
    /// Returns the checkpoint too, so the caller can surface its status and
    /// last error. Without a checkpoint the ledger starts at [`Stage::None`].
    pub async fn restore(
        plan_id: PlanDigest,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<(Self, Option<StageCheckpoint>), LedgerError> {
        let checkpoint = store.load(&plan_id).await?;
        let stage = match &checkpoint {
            Some(cp) => Stage::from_index(cp.stage)
                .map_err(|_| LedgerError::CorruptCheckpoint { stage: cp.stage })?,
            None => Stage::None,
        };
        let ledger = Self {
            plan_id,
            stage,
            store: Some(store),
        };
        Ok((ledger, checkpoint))
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn plan_id(&self) -> &PlanDigest {
        &self.plan_id
    }

    /// Whether `stage` is already covered by the cursor.
    pub fn is_done(&self, stage: Stage) -> bool {
        stage <= self.stage
    }

    /// Move the cursor forward to `to`. Re-advancing to the current stage is a no-op.
    pub async fn advance(&mut self, to: Stage, sink: &ProgressSink) -> Result<(), LedgerError> {
        if to < self.stage {
            return Err(LedgerError::Regression {
                from: self.stage,
                to,
            });
        }
        if to == self.stage {
            return Ok(());
        }
        self.stage = to;
        self.persist(CheckpointStatus::Running, None, sink).await;
        Ok(())
    }

    /// Write the current cursor with a run status (failed, succeeded, overridden).
    pub async fn record(&self, status: CheckpointStatus, error: Option<&str>, sink: &ProgressSink) {
        self.persist(status, error, sink).await;
    }

    /// Return to [`Stage::None`]. Only a completed rollback may do this.
    pub(crate) async fn reset_after_rollback(&mut self, sink: &ProgressSink) {
        self.stage = Stage::None;
        self.persist(CheckpointStatus::RolledBack, None, sink).await;
    }

    async fn persist(&self, status: CheckpointStatus, error: Option<&str>, sink: &ProgressSink) {
        let Some(store) = &self.store else {
            return;
        };
        let mut checkpoint = StageCheckpoint::new(self.plan_id.clone(), self.stage.index(), status);
        if let Some(e) = error {
            checkpoint = checkpoint.with_error(e);
        }
        if let Err(e) = store.save(&checkpoint).await {
            sink.emit(
                EventDraft::warn(format!(
                    "could not persist checkpoint at {}: {e}",
                    self.stage
                ))
                .stage(self.stage),
            );
        }
    }
}

impl std::fmt::Debug for StageLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageLedger")
            .field("plan_id", &self.plan_id.short())
            .field("stage", &self.stage)
            .field("durable", &self.store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use orgmove_state::fakes::MemoryCheckpointStore;
    use orgmove_state::{StorageError, StorageResult};

    fn digest() -> PlanDigest {
        PlanDigest::from_bytes(b"ledger-test")
    }

    #[tokio::test]
    async fn advances_monotonically() {
        let sink = ProgressSink::new("t");
        let mut ledger = StageLedger::new(digest());
        assert_eq!(ledger.stage(), Stage::None);
        ledger.advance(Stage::RemovedFromSourceNetwork, &sink).await.unwrap();
        ledger.advance(Stage::UnclaimedFromSource, &sink).await.unwrap();
        ledger.advance(Stage::UnclaimedFromSource, &sink).await.unwrap();
        assert!(ledger.is_done(Stage::RemovedFromSourceNetwork));
        assert!(!ledger.is_done(Stage::ClaimedToDestination));

        let err = ledger
            .advance(Stage::RemovedFromSourceNetwork, &sink)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Regression { .. }));
        assert_eq!(ledger.stage(), Stage::UnclaimedFromSource);
    }

    #[tokio::test]
    async fn writes_checkpoints_and_restores() {
        let sink = ProgressSink::new("t");
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut ledger = StageLedger::new(digest()).with_store(store.clone());
        ledger.advance(Stage::RemovedFromSourceNetwork, &sink).await.unwrap();
        ledger.advance(Stage::UnclaimedFromSource, &sink).await.unwrap();
        ledger
            .record(CheckpointStatus::Failed, Some("rate limited"), &sink)
            .await;
        assert_eq!(store.write_count(), 3);

        let (restored, cp) = StageLedger::restore(digest(), store.clone()).await.unwrap();
        assert_eq!(restored.stage(), Stage::UnclaimedFromSource);
        let cp = cp.unwrap();
        assert_eq!(cp.status, CheckpointStatus::Failed);
        assert_eq!(cp.last_error.as_deref(), Some("rate limited"));
    }

    #[tokio::test]
    async fn reset_records_rolled_back() {
        let sink = ProgressSink::new("t");
        let store = Arc::new(MemoryCheckpointStore::new());
        let mut ledger = StageLedger::new(digest()).with_store(store.clone());
        ledger.advance(Stage::ClaimedToDestination, &sink).await.unwrap();
        ledger.reset_after_rollback(&sink).await;
        assert_eq!(ledger.stage(), Stage::None);
        let cp = store.load(&digest()).await.unwrap().unwrap();
        assert_eq!(cp.stage, 0);
        assert_eq!(cp.status, CheckpointStatus::RolledBack);
    }

    #[tokio::test]
    async fn restore_without_checkpoint_starts_fresh() {
        let store = Arc::new(MemoryCheckpointStore::new());
        let (ledger, cp) = StageLedger::restore(digest(), store).await.unwrap();
        assert_eq!(ledger.stage(), Stage::None);
        assert!(cp.is_none());
    }

    struct BrokenStore;

    #[async_trait]
    impl CheckpointStore for BrokenStore {
        async fn save(&self, _: &StageCheckpoint) -> StorageResult<()> {
            Err(StorageError::Backend("disk full".into()))
        }
        async fn load(&self, _: &PlanDigest) -> StorageResult<Option<StageCheckpoint>> {
            Ok(None)
        }
        async fn clear(&self, _: &PlanDigest) -> StorageResult<()> {
            Ok(())
        }
        async fn list(&self) -> StorageResult<Vec<StageCheckpoint>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn persistence_failure_is_a_warning() {
        let sink = ProgressSink::new("t");
        let mut ledger = StageLedger::new(digest()).with_store(Arc::new(BrokenStore));
        ledger.advance(Stage::RemovedFromSourceNetwork, &sink).await.unwrap();
        assert_eq!(ledger.stage(), Stage::RemovedFromSourceNetwork);
        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].message.contains("disk full"));
    }
}

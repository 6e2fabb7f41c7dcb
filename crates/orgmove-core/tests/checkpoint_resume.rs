//! Durable checkpoints: a second controller picks up where a crashed one stopped.

use std::sync::Arc;

use orgmove_core::{
    CheckpointStatus, CheckpointStore, ControllerError, DeviceRef, EngineConfig, MigrationPlan,
    OrgCredentials, Region, RunController, RunPhase, Stage,
};
use orgmove_gateway::fakes::{Operation, RecordingGateway};
use orgmove_state::fakes::MemoryCheckpointStore;
use orgmove_state::SurrealCheckpointStore;

fn plan() -> MigrationPlan {
    MigrationPlan::new(
        OrgCredentials::new("src-key", Region::Global, "org-src").with_network("N_src"),
        OrgCredentials::new("dst-key", Region::India, "org-dst").with_network("N_dst"),
        vec![
            DeviceRef::new("Q2AA-0001", "lobby").in_network("N_src"),
            DeviceRef::new("Q2AA-0002", "floor2").in_network("N_src"),
        ],
    )
}

fn durable(
    plan: MigrationPlan,
    gw: &Arc<RecordingGateway>,
    store: Arc<dyn CheckpointStore>,
) -> RunController {
    RunController::new(plan, gw.clone(), EngineConfig::immediate())
        .unwrap()
        .with_store(store)
}

#[tokio::test]
async fn resumed_controller_retries_from_checkpoint() {
    let gw = Arc::new(RecordingGateway::new());
    gw.fail_once(Operation::ClaimToInventory, "rate limited");
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut first = durable(plan(), &gw, store.clone());
    first.start().await.unwrap();
    drop(first);

    let saved = store.load(&plan().digest()).await.unwrap().unwrap();
    assert_eq!(saved.stage, Stage::UnclaimedFromSource.index());
    assert_eq!(saved.status, CheckpointStatus::Failed);
    assert_eq!(saved.last_error.as_deref(), Some("rate limited"));

    gw.reset_calls();
    let mut resumed = RunController::resume(plan(), gw.clone(), store.clone(), EngineConfig::immediate())
        .await
        .unwrap();
    assert_eq!(resumed.phase(), RunPhase::Failed);
    assert_eq!(resumed.stage(), Stage::UnclaimedFromSource);
    let failure = resumed.failure().unwrap();
    assert_eq!(failure.stage, Stage::ClaimedToDestination);
    assert_eq!(failure.error, "rate limited");

    assert!(resumed.retry().await.unwrap().is_success());
    assert_eq!(
        gw.operations(),
        vec![Operation::ClaimToInventory, Operation::AddToNetwork]
    );
    let saved = store.load(&plan().digest()).await.unwrap().unwrap();
    assert_eq!(saved.stage, 4);
    assert_eq!(saved.status, CheckpointStatus::Succeeded);
}

#[tokio::test]
async fn rotated_api_key_still_finds_checkpoint() {
    let gw = Arc::new(RecordingGateway::new());
    gw.fail(Operation::UnclaimFromInventory, "locked");
    let store = Arc::new(MemoryCheckpointStore::new());
    durable(plan(), &gw, store.clone()).start().await.unwrap();

    let mut rotated = plan();
    rotated.source.api_key = "new-src-key".into();
    let resumed = RunController::resume(rotated, gw.clone(), store, EngineConfig::immediate())
        .await
        .unwrap();
    assert_eq!(resumed.stage(), Stage::RemovedFromSourceNetwork);
}

#[tokio::test]
async fn resume_without_checkpoint_is_an_error() {
    let gw = Arc::new(RecordingGateway::new());
    let store = Arc::new(MemoryCheckpointStore::new());
    let err = RunController::resume(plan(), gw, store, EngineConfig::immediate())
        .await
        .unwrap_err();
    assert!(matches!(err, ControllerError::NoCheckpoint(_)));
}

#[tokio::test]
async fn terminal_checkpoints_restore_terminal_phases() {
    let gw = Arc::new(RecordingGateway::new());
    gw.fail(Operation::AddToNetwork, "network full");
    let store = Arc::new(MemoryCheckpointStore::new());

    let mut run = durable(plan(), &gw, store.clone());
    run.start().await.unwrap();
    run.skip().await.unwrap();
    let resumed = RunController::resume(plan(), gw.clone(), store.clone(), EngineConfig::immediate())
        .await
        .unwrap();
    assert_eq!(resumed.phase(), RunPhase::Succeeded);
    assert!(!resumed.outcome().unwrap().verified);

    let mut resumed = resumed;
    resumed.rollback().await.unwrap();
    let saved = store.load(&plan().digest()).await.unwrap().unwrap();
    assert_eq!(saved.stage, 0);
    assert_eq!(saved.status, CheckpointStatus::RolledBack);

    let resumed = RunController::resume(plan(), gw, store, EngineConfig::immediate())
        .await
        .unwrap();
    assert_eq!(resumed.phase(), RunPhase::RolledBack);
    assert_eq!(resumed.stage(), Stage::None);
}

#[tokio::test]
async fn surreal_backend_survives_failure_and_rollback() {
    let gw = Arc::new(RecordingGateway::new());
    gw.fail(Operation::UnclaimFromInventory, "inventory locked");
    let store: Arc<dyn CheckpointStore> = Arc::new(SurrealCheckpointStore::in_memory().await.unwrap());

    let mut run = durable(plan(), &gw, store.clone());
    run.start().await.unwrap();
    drop(run);

    let mut resumed = RunController::resume(plan(), gw.clone(), store.clone(), EngineConfig::immediate())
        .await
        .unwrap();
    assert_eq!(resumed.stage(), Stage::RemovedFromSourceNetwork);
    assert_eq!(resumed.failure().unwrap().error, "inventory locked");

    gw.reset_calls();
    resumed.rollback().await.unwrap();
    assert_eq!(gw.operations(), vec![Operation::AddToNetwork]);

    let saved = store.load(&plan().digest()).await.unwrap().unwrap();
    assert_eq!(saved.stage, 0);
    assert_eq!(saved.status, CheckpointStatus::RolledBack);
    assert_eq!(store.list().await.unwrap().len(), 1);
}

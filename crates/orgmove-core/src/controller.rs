//! Run controller: the state machine a caller drives.
//!
//! ```text
//! Idle --start--> Running --ok--> Succeeded --rollback--> RollingBack --> RolledBack
//!                    |
//!                    +--stage failure / cancel--> Failed
//!                                                  |-- retry    --> Retrying --> Running
//!                                                  |-- rollback --> RollingBack --> RolledBack
//!                                                  +-- skip     --> Succeeded (unverified)
//! ```
//!
//! The controller owns the plan, the stage ledger and the progress sink of
//! exactly one run. A fresh plan needs a fresh controller.

use std::sync::Arc;
use std::time::Instant;

use orgmove_gateway::DeviceGateway;
use orgmove_state::{CheckpointStatus, CheckpointStore, StageCheckpoint};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::Instrument;

use crate::cancel::{cancel_pair, CancelHandle};
use crate::config::EngineConfig;
use crate::domain::{
    EventDraft, LedgerError, MigrationPlan, PlanError, ProgressEvent, RollbackOutcome, RunOutcome,
    Stage, StageFailure,
};
use crate::ledger::StageLedger;
use crate::metrics::METRICS;
use crate::obs;
use crate::orchestrator::MigrationOrchestrator;
use crate::rollback::RollbackController;
use crate::sink::ProgressSink;

/// Controller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    Running,
    Succeeded,
    Failed,
    /// Between an operator's retry and the orchestrator re-entering `Running`.
    Retrying,
    RollingBack,
    RolledBack,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::Succeeded => "succeeded",
            RunPhase::Failed => "failed",
            RunPhase::Retrying => "retrying",
            RunPhase::RollingBack => "rolling back",
            RunPhase::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("cannot {action} while {from}")]
    InvalidTransition { from: RunPhase, action: &'static str },

    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error("checkpoint storage: {0}")]
    Storage(#[from] LedgerError),

    #[error("no checkpoint saved for plan {0}")]
    NoCheckpoint(String),
}

/// Terminal result of `start` or `retry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    Succeeded(RunOutcome),
    Failed(StageFailure),
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Succeeded(_))
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        match self {
            RunResult::Succeeded(o) => Some(o),
            RunResult::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match self {
            RunResult::Succeeded(_) => None,
            RunResult::Failed(f) => Some(f),
        }
    }
}

pub struct RunController {
    run_id: String,
    plan: MigrationPlan,
    ledger: StageLedger,
    sink: ProgressSink,
    orchestrator: MigrationOrchestrator,
    rollback: RollbackController,
    phase: watch::Sender<RunPhase>,
    cancel: CancelHandle,
    failure: Option<StageFailure>,
    outcome: Option<RunOutcome>,
}

impl RunController {
    /// Validate `plan` and build an idle controller with an in-memory ledger.
    pub fn new(
        plan: MigrationPlan,
        gateway: Arc<dyn DeviceGateway>,
        config: EngineConfig,
    ) -> Result<Self, ControllerError> {
        plan.validate()?;
        let ledger = StageLedger::new(plan.digest());
        Ok(Self::assemble(plan, gateway, config, ledger, RunPhase::Idle))
    }

    /// Persist ledger transitions to `store`.
    pub fn with_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.ledger = self.ledger.with_store(store);
        self
    }

    /// Rebuild a controller from the checkpoint saved for `plan`.
    ///
    /// An interrupted or failed run comes back `Failed`, ready for `retry`,
    /// `rollback` or `skip`. Terminal checkpoints restore their terminal phase.
    pub async fn resume(
        plan: MigrationPlan,
        gateway: Arc<dyn DeviceGateway>,
        store: Arc<dyn CheckpointStore>,
        config: EngineConfig,
    ) -> Result<Self, ControllerError> {
        plan.validate()?;
        let digest = plan.digest();
        let (ledger, checkpoint) = StageLedger::restore(digest.clone(), store).await?;
        let checkpoint = checkpoint.ok_or_else(|| ControllerError::NoCheckpoint(digest.to_string()))?;

        let phase = match checkpoint.status {
            CheckpointStatus::Running | CheckpointStatus::Failed => RunPhase::Failed,
            CheckpointStatus::Succeeded | CheckpointStatus::Overridden => RunPhase::Succeeded,
            CheckpointStatus::RolledBack => RunPhase::RolledBack,
        };
        let mut controller = Self::assemble(plan, gateway, config, ledger, phase);
        controller.restore_from(&checkpoint);
        Ok(controller)
    }

    fn assemble(
        plan: MigrationPlan,
        gateway: Arc<dyn DeviceGateway>,
        config: EngineConfig,
        ledger: StageLedger,
        phase: RunPhase,
    ) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        let sink = ProgressSink::new(ledger.plan_id().short());
        let orchestrator =
            MigrationOrchestrator::new(gateway.clone(), config.clone()).with_run_id(run_id.clone());
        let rollback = RollbackController::new(gateway, config);
        let (phase, _) = watch::channel(phase);
        let (cancel, _) = cancel_pair();
        Self {
            run_id,
            plan,
            ledger,
            sink,
            orchestrator,
            rollback,
            phase,
            cancel,
            failure: None,
            outcome: None,
        }
    }

    fn restore_from(&mut self, checkpoint: &StageCheckpoint) {
        let stage = self.ledger.stage();
        self.sink.emit(
            EventDraft::info(format!(
                "restored checkpoint: {stage}, status {}",
                checkpoint.status
            ))
            .stage(stage),
        );
        match self.phase() {
            RunPhase::Failed => {
                let next = stage.next().unwrap_or(stage);
                let error = checkpoint
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "run interrupted before completion".to_string());
                self.failure = Some(StageFailure::new(next, error));
            }
            RunPhase::Succeeded => {
                let devices = self.plan.devices.clone();
                self.outcome = Some(if checkpoint.status == CheckpointStatus::Overridden {
                    RunOutcome::asserted(devices)
                } else {
                    RunOutcome::verified(devices)
                });
            }
            _ => {}
        }
    }

    /// `Idle -> Running`, then `Succeeded` or `Failed`.
    pub async fn start(&mut self) -> Result<RunResult, ControllerError> {
        self.expect_phase(&[RunPhase::Idle], "start")?;
        obs::emit_run_started(
            &self.run_id,
            self.ledger.plan_id().short(),
            self.plan.devices.len(),
            self.ledger.stage(),
        );
        self.sink.info(format!(
            "starting migration of {} device(s) from org {} to org {}",
            self.plan.devices.len(),
            self.plan.source.org_id,
            self.plan.destination.org_id
        ));
        Ok(self.drive().await)
    }

    /// `Failed -> Running`. Stages the ledger already covers are skipped.
    pub async fn retry(&mut self) -> Result<RunResult, ControllerError> {
        self.expect_phase(&[RunPhase::Failed], "retry")?;
        self.set_phase(RunPhase::Retrying);
        self.cancel.reset();
        self.sink.emit(
            EventDraft::info(format!("retrying from {}", self.ledger.stage())).stage(self.ledger.stage()),
        );
        Ok(self.drive().await)
    }

    /// `Failed | Succeeded -> RollingBack -> RolledBack`. Terminal.
    pub async fn rollback(&mut self) -> Result<RollbackOutcome, ControllerError> {
        self.expect_phase(&[RunPhase::Failed, RunPhase::Succeeded], "roll back")?;
        self.set_phase(RunPhase::RollingBack);
        let span = obs::run_span(&self.run_id, self.ledger.plan_id().short());
        let outcome = self
            .rollback
            .rollback(&self.plan, &mut self.ledger, &self.sink)
            .instrument(span)
            .await;
        METRICS.inc_rollbacks();
        obs::emit_rollback_finished(&self.run_id, outcome.from_stage, outcome.warnings.len());
        METRICS.flush();
        self.outcome = None;
        self.set_phase(RunPhase::RolledBack);
        Ok(outcome)
    }

    /// `Failed -> Succeeded` on the operator's word that the devices were
    /// moved out-of-band. The outcome is marked unverified.
    pub async fn skip(&mut self) -> Result<RunOutcome, ControllerError> {
        self.expect_phase(&[RunPhase::Failed], "skip")?;
        let failed_stage = self.failure.as_ref().map(|f| f.stage);
        let outcome = RunOutcome::asserted(self.plan.devices.clone());
        self.sink.emit(
            EventDraft::warn(format!(
                "operator override: {} device(s) marked migrated without verification",
                outcome.migrated_devices.len()
            ))
            .operator_override(),
        );
        self.ledger
            .record(CheckpointStatus::Overridden, None, &self.sink)
            .await;
        METRICS.inc_operator_overrides();
        obs::emit_operator_override(&self.run_id, failed_stage);
        self.outcome = Some(outcome.clone());
        self.set_phase(RunPhase::Succeeded);
        Ok(outcome)
    }

    async fn drive(&mut self) -> RunResult {
        self.set_phase(RunPhase::Running);
        let started = Instant::now();
        let mut signal = self.cancel.signal();
        let span = obs::run_span(&self.run_id, self.ledger.plan_id().short());
        let result = self
            .orchestrator
            .run(&self.plan, &mut self.ledger, &self.sink, &mut signal)
            .instrument(span)
            .await;

        match result {
            Ok(outcome) => {
                self.ledger
                    .record(CheckpointStatus::Succeeded, None, &self.sink)
                    .await;
                obs::emit_run_succeeded(
                    &self.run_id,
                    outcome.migrated_devices.len(),
                    started.elapsed().as_millis() as u64,
                );
                METRICS.flush();
                self.failure = None;
                self.outcome = Some(outcome.clone());
                self.set_phase(RunPhase::Succeeded);
                RunResult::Succeeded(outcome)
            }
            Err(e) => {
                let failure = e.into_failure(self.ledger.stage());
                METRICS.inc_stage_failures();
                obs::emit_run_failed(&self.run_id, failure.stage, &failure.error);
                self.ledger
                    .record(CheckpointStatus::Failed, Some(&failure.error), &self.sink)
                    .await;
                self.sink.emit(
                    EventDraft::error(format!(
                        "run halted at {}: {}. Retry, roll back or skip",
                        failure.stage, failure.error
                    ))
                    .stage(failure.stage),
                );
                METRICS.flush();
                self.failure = Some(failure.clone());
                self.set_phase(RunPhase::Failed);
                RunResult::Failed(failure)
            }
        }
    }

    fn expect_phase(&self, allowed: &[RunPhase], action: &'static str) -> Result<(), ControllerError> {
        let from = self.phase();
        if allowed.contains(&from) {
            Ok(())
        } else {
            Err(ControllerError::InvalidTransition { from, action })
        }
    }

    fn set_phase(&self, phase: RunPhase) {
        self.phase.send_replace(phase);
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn plan(&self) -> &MigrationPlan {
        &self.plan
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// Highest completed stage.
    pub fn stage(&self) -> Stage {
        self.ledger.stage()
    }

    /// Failure surfaced to the operator while `Failed`.
    pub fn failure(&self) -> Option<&StageFailure> {
        self.failure.as_ref()
    }

    pub fn outcome(&self) -> Option<&RunOutcome> {
        self.outcome.as_ref()
    }

    /// Snapshot of the progress log.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.sink.events()
    }

    /// Live progress events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sink.subscribe()
    }

    /// Live phase changes.
    pub fn watch_phase(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    /// Handle that cancels the current or next forward run.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl std::fmt::Debug for RunController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("run_id", &self.run_id)
            .field("phase", &self.phase())
            .field("ledger", &self.ledger)
            .field("failure", &self.failure)
            .finish()
    }
}

//! Migration orchestrator: the four-stage forward protocol.
//!
//! Stages run strictly in order with a propagation wait after each one.
//! Stage 1 fans out one removal per device and tolerates individual
//! failures; stages 2-4 are single batched calls whose failure halts the
//! run with the ledger left at the last completed stage. Stages the ledger
//! already covers are skipped, so re-running after a failure never repeats
//! a side effect.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use orgmove_gateway::DeviceGateway;

use crate::cancel::CancelSignal;
use crate::config::EngineConfig;
use crate::domain::{EventDraft, LedgerError, MigrationPlan, RunOutcome, Stage, StageFailure};
use crate::ledger::StageLedger;
use crate::metrics::METRICS;
use crate::obs;
use crate::sink::ProgressSink;

/// Error text recorded when an operator cancels a run.
pub const CANCELLED_MESSAGE: &str = "cancelled by operator";

/// Why a forward run halted.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error(transparent)]
    StageFailed(#[from] StageFailure),

    /// Cancellation observed before `stage` began.
    #[error("cancelled by operator before {stage}")]
    Cancelled { stage: Stage },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl MigrationError {
    /// The halted run as a [`StageFailure`]: the stage that did not complete
    /// and the text an operator should see.
    pub fn into_failure(self, ledger_stage: Stage) -> StageFailure {
        match self {
            MigrationError::StageFailed(failure) => failure,
            MigrationError::Cancelled { stage } => StageFailure::new(stage, CANCELLED_MESSAGE),
            MigrationError::Ledger(e) => {
                StageFailure::new(ledger_stage.next().unwrap_or(ledger_stage), e.to_string())
            }
        }
    }
}

pub struct MigrationOrchestrator {
    gateway: Arc<dyn DeviceGateway>,
    config: EngineConfig,
    run_id: String,
}

impl MigrationOrchestrator {
    pub fn new(gateway: Arc<dyn DeviceGateway>, config: EngineConfig) -> Self {
        Self {
            gateway,
            config,
            run_id: String::new(),
        }
    }

    /// Tag lifecycle log records with `run_id`.
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    /// Drive `plan` from the ledger's current stage to completion.
    ///
    /// Never retries on its own; the caller decides what happens after an error.
    pub async fn run(
        &self,
        plan: &MigrationPlan,
        ledger: &mut StageLedger,
        sink: &ProgressSink,
        cancel: &mut CancelSignal,
    ) -> Result<RunOutcome, MigrationError> {
        for stage in Stage::FORWARD {
            if ledger.is_done(stage) {
                sink.emit(EventDraft::info(format!("{stage} already completed, skipping")).stage(stage));
                continue;
            }
            if cancel.is_cancelled() {
                sink.emit(EventDraft::warn(format!("{CANCELLED_MESSAGE} before {stage}")).stage(stage));
                return Err(MigrationError::Cancelled { stage });
            }

            sink.emit(EventDraft::info(format!("starting {stage}")).stage(stage));
            let warnings = match self.execute(stage, plan, sink).await {
                Ok(warnings) => warnings,
                Err(failure) => {
                    sink.emit(EventDraft::error(failure.to_string()).stage(stage));
                    return Err(failure.into());
                }
            };

            ledger.advance(stage, sink).await?;
            METRICS.inc_stages_completed();
            METRICS.add_device_warnings(warnings as u64);
            obs::emit_stage_completed(&self.run_id, stage, warnings);
            sink.emit(EventDraft::info(format!("{stage} completed")).stage(stage));

            match stage.next() {
                Some(next) => {
                    if !self.wait(self.config.propagation_delay, sink, cancel).await {
                        sink.emit(EventDraft::warn(format!("{CANCELLED_MESSAGE} before {next}")).stage(next));
                        return Err(MigrationError::Cancelled { stage: next });
                    }
                }
                None => {
                    // Every stage is done; a cancel here only shortens the wait.
                    if !self.wait(self.config.final_delay, sink, cancel).await {
                        sink.warn("final propagation wait cut short by cancellation");
                    }
                }
            }
        }

        sink.info(format!("{} device(s) migrated", plan.devices.len()));
        Ok(RunOutcome::verified(plan.devices.clone()))
    }

    /// Run one stage's remote calls. `Ok` carries the number of soft warnings.
    async fn execute(
        &self,
        stage: Stage,
        plan: &MigrationPlan,
        sink: &ProgressSink,
    ) -> Result<usize, StageFailure> {
        let serials = plan.serials();
        let gateway = self.gateway.as_ref();
        let result = match stage {
            Stage::None => return Ok(0),
            Stage::RemovedFromSourceNetwork => return Ok(self.remove_from_source(plan, sink).await),
            Stage::UnclaimedFromSource => {
                gateway
                    .unclaim_from_inventory(&plan.source, &plan.source.org_id, &serials)
                    .await
            }
            Stage::ClaimedToDestination => {
                gateway
                    .claim_to_inventory(&plan.destination, &plan.destination.org_id, &serials)
                    .await
            }
            Stage::AddedToDestinationNetwork => {
                let Some(network_id) = plan.destination_network() else {
                    return Err(StageFailure::new(stage, "destination network id is missing"));
                };
                gateway
                    .add_to_network(&plan.destination, network_id, &serials)
                    .await
            }
        };
        result
            .map(|()| 0)
            .map_err(|e| StageFailure::from_gateway(stage, &e))
    }

    /// Stage 1: concurrent per-device removal. Settles on all devices; each
    /// failure is one warning event.
    async fn remove_from_source(&self, plan: &MigrationPlan, sink: &ProgressSink) -> usize {
        let stage = Stage::RemovedFromSourceNetwork;
        let gateway = self.gateway.as_ref();
        let source = &plan.source;

        let removals = plan.devices.iter().map(|device| async move {
            let Some(network_id) = device.network() else {
                sink.emit(
                    EventDraft::info(format!(
                        "{} is not assigned to a network, skipping removal",
                        device.display_name()
                    ))
                    .stage(stage)
                    .serial(&device.serial),
                );
                return false;
            };
            match gateway
                .remove_from_network(source, network_id, &device.serial)
                .await
            {
                Ok(()) => {
                    sink.emit(
                        EventDraft::info(format!(
                            "removed {} from network {network_id}",
                            device.display_name()
                        ))
                        .stage(stage)
                        .serial(&device.serial),
                    );
                    false
                }
                Err(e) => {
                    sink.emit(
                        EventDraft::warn(format!(
                            "could not remove {} from network {network_id}: {e}; continuing",
                            device.display_name()
                        ))
                        .stage(stage)
                        .serial(&device.serial),
                    );
                    true
                }
            }
        });

        join_all(removals).await.into_iter().filter(|failed| *failed).count()
    }

    async fn wait(&self, delay: Duration, sink: &ProgressSink, cancel: &mut CancelSignal) -> bool {
        if !delay.is_zero() {
            sink.info(format!("waiting {}s for changes to propagate", delay.as_secs_f64()));
        }
        cancel.sleep(delay).await
    }
}

//! Rollback controller: compensate completed stages in reverse order.
//!
//! Best effort. A failed compensating call becomes a warning and the next
//! compensation still runs. Once every applicable step has been attempted
//! the ledger returns to [`Stage::None`].

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use orgmove_gateway::{DeviceGateway, GatewayError};

use crate::config::EngineConfig;
use crate::domain::{
    CompensationWarning, EventDraft, MigrationPlan, RollbackOutcome, Stage,
};
use crate::ledger::StageLedger;
use crate::metrics::METRICS;
use crate::sink::ProgressSink;

pub struct RollbackController {
    gateway: Arc<dyn DeviceGateway>,
    config: EngineConfig,
}

impl RollbackController {
    pub fn new(gateway: Arc<dyn DeviceGateway>, config: EngineConfig) -> Self {
        Self { gateway, config }
    }

    /// Undo every stage the ledger records as completed, highest first.
    pub async fn rollback(
        &self,
        plan: &MigrationPlan,
        ledger: &mut StageLedger,
        sink: &ProgressSink,
    ) -> RollbackOutcome {
        let from_stage = ledger.stage();
        let mut outcome = RollbackOutcome {
            from_stage,
            compensated: Vec::new(),
            warnings: Vec::new(),
        };

        if from_stage == Stage::None {
            sink.info("nothing to roll back");
        } else {
            sink.info(format!("rolling back from {from_stage}"));
        }

        for stage in Stage::FORWARD.iter().rev().copied() {
            if !ledger.is_done(stage) {
                continue;
            }
            if !outcome.compensated.is_empty() && !self.config.propagation_delay.is_zero() {
                sink.info(format!(
                    "waiting {}s for changes to propagate",
                    self.config.propagation_delay.as_secs_f64()
                ));
                tokio::time::sleep(self.config.propagation_delay).await;
            }
            let warnings = self.compensate(stage, plan, sink).await;
            outcome.compensated.push(stage);
            outcome.warnings.extend(warnings);
        }

        METRICS.add_device_warnings(outcome.warnings.len() as u64);
        ledger.reset_after_rollback(sink).await;
        if outcome.is_clean() {
            sink.info("rollback complete");
        } else {
            sink.warn(format!(
                "rollback complete with {} warning(s); verify device state manually",
                outcome.warnings.len()
            ));
        }
        outcome
    }

    async fn compensate(
        &self,
        stage: Stage,
        plan: &MigrationPlan,
        sink: &ProgressSink,
    ) -> Vec<CompensationWarning> {
        let gateway = self.gateway.as_ref();
        let serials = plan.serials();
        match stage {
            Stage::None => Vec::new(),
            Stage::AddedToDestinationNetwork => self.remove_from_destination(plan, sink).await,
            Stage::ClaimedToDestination => {
                sink.emit(
                    EventDraft::info(format!(
                        "unclaiming {} device(s) from destination inventory",
                        serials.len()
                    ))
                    .stage(stage),
                );
                let result = gateway
                    .unclaim_from_inventory(&plan.destination, &plan.destination.org_id, &serials)
                    .await;
                settle(stage, None, result, sink).into_iter().collect()
            }
            Stage::UnclaimedFromSource => {
                sink.emit(
                    EventDraft::info(format!(
                        "re-claiming {} device(s) into source inventory",
                        serials.len()
                    ))
                    .stage(stage),
                );
                let result = gateway
                    .claim_to_inventory(&plan.source, &plan.source.org_id, &serials)
                    .await;
                settle(stage, None, result, sink).into_iter().collect()
            }
            Stage::RemovedFromSourceNetwork => self.readd_to_source(plan, sink).await,
        }
    }

    /// Undo stage 4: one removal per device, concurrently.
    async fn remove_from_destination(
        &self,
        plan: &MigrationPlan,
        sink: &ProgressSink,
    ) -> Vec<CompensationWarning> {
        let stage = Stage::AddedToDestinationNetwork;
        let Some(network_id) = plan.destination_network() else {
            sink.emit(
                EventDraft::warn("no destination network recorded, cannot remove devices from it")
                    .stage(stage),
            );
            return vec![CompensationWarning {
                stage,
                serial: None,
                error: "destination network id is missing".to_string(),
            }];
        };
        sink.emit(
            EventDraft::info(format!(
                "removing {} device(s) from destination network {network_id}",
                plan.devices.len()
            ))
            .stage(stage),
        );
        let gateway = self.gateway.as_ref();
        let destination = &plan.destination;
        let removals = plan.devices.iter().map(|device| async move {
            let result = gateway
                .remove_from_network(destination, network_id, &device.serial)
                .await;
            settle(stage, Some(device.serial.as_str()), result, sink)
        });
        join_all(removals).await.into_iter().flatten().collect()
    }

    /// Undo stage 1: re-add to the recorded source network, or to each
    /// device's own network when the plan has no source network.
    async fn readd_to_source(
        &self,
        plan: &MigrationPlan,
        sink: &ProgressSink,
    ) -> Vec<CompensationWarning> {
        let stage = Stage::RemovedFromSourceNetwork;
        let mut targets: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        match plan.source_network() {
            Some(network_id) => {
                targets.insert(network_id, plan.serials());
            }
            None => {
                for device in &plan.devices {
                    if let Some(network_id) = device.network() {
                        targets
                            .entry(network_id)
                            .or_default()
                            .push(device.serial.clone());
                    }
                }
            }
        }

        if targets.is_empty() {
            sink.emit(
                EventDraft::info("no source network recorded, skipping re-add").stage(stage),
            );
            return Vec::new();
        }

        let mut warnings = Vec::new();
        for (network_id, serials) in targets {
            sink.emit(
                EventDraft::info(format!(
                    "re-adding {} device(s) to source network {network_id}",
                    serials.len()
                ))
                .stage(stage),
            );
            let result = self
                .gateway
                .add_to_network(&plan.source, network_id, &serials)
                .await;
            warnings.extend(settle(stage, None, result, sink));
        }
        warnings
    }
}

/// Log a compensating call's result; a failure becomes a warning.
fn settle(
    stage: Stage,
    serial: Option<&str>,
    result: Result<(), GatewayError>,
    sink: &ProgressSink,
) -> Option<CompensationWarning> {
    let error = result.err()?;
    let mut draft = EventDraft::warn(format!("could not undo {stage}: {error}; continuing")).stage(stage);
    if let Some(s) = serial {
        draft = draft.serial(s);
    }
    sink.emit(draft);
    Some(CompensationWarning {
        stage,
        serial: serial.map(str::to_string),
        error: error.to_string(),
    })
}

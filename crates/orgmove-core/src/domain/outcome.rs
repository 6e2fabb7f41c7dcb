//! Terminal values of runs and rollbacks.

use orgmove_gateway::GatewayError;
use serde::{Deserialize, Serialize};

use super::plan::DeviceRef;
use super::stage::Stage;

/// A device the run could not migrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedDevice {
    pub device: DeviceRef,
    pub error: String,
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub migrated_devices: Vec<DeviceRef>,
    pub failed_devices: Vec<FailedDevice>,
    /// `false` when synthesized from an operator's skip.
    pub verified: bool,
}

impl RunOutcome {
    /// Every device migrated, confirmed by the remote side.
    pub fn verified(devices: Vec<DeviceRef>) -> Self {
        Self {
            migrated_devices: devices,
            failed_devices: Vec::new(),
            verified: true,
        }
    }

    /// Every device migrated, on the operator's word.
    pub fn asserted(devices: Vec<DeviceRef>) -> Self {
        Self {
            migrated_devices: devices,
            failed_devices: Vec::new(),
            verified: false,
        }
    }
}

/// A stage-fatal failure. `error` is the gateway error text, verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{stage} failed: {error}")]
pub struct StageFailure {
    pub stage: Stage,
    pub error: String,
    /// Repeating the stage later may succeed (rate limits, outages).
    #[serde(default)]
    pub transient: bool,
}

impl StageFailure {
    pub fn new(stage: Stage, error: impl Into<String>) -> Self {
        Self {
            stage,
            error: error.into(),
            transient: false,
        }
    }

    /// Failure of a remote call; keeps whether the error is transient.
    pub fn from_gateway(stage: Stage, error: &GatewayError) -> Self {
        Self {
            stage,
            error: error.to_string(),
            transient: error.is_transient(),
        }
    }

    /// Stage number, 1 through 4.
    pub fn stage_number(&self) -> u8 {
        self.stage.index()
    }
}

/// A compensating step that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationWarning {
    /// Forward stage being undone.
    pub stage: Stage,
    pub serial: Option<String>,
    pub error: String,
}

/// Result of a rollback. Rollback always completes; failed steps are listed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    /// Ledger position rollback started from.
    pub from_stage: Stage,
    /// Forward stages whose compensations were attempted, highest first.
    pub compensated: Vec<Stage>,
    pub warnings: Vec<CompensationWarning>,
}

impl RollbackOutcome {
    /// Whether every compensating call succeeded.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

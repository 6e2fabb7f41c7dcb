//! orgmove Core Library
//!
//! The staged cross-organization migration engine: stage ledger, progress
//! sink, migration orchestrator, rollback controller and the run controller
//! that ties them together.
//!
//! ## Layer 2 - Engine

pub mod cancel;
pub mod config;
pub mod controller;
pub mod domain;
pub mod ledger;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod rollback;
pub mod sink;
pub mod telemetry;

pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use config::EngineConfig;
pub use controller::{ControllerError, RunController, RunPhase, RunResult};
pub use domain::{
    CompensationWarning, DeviceRef, EventDraft, FailedDevice, LedgerError, MigrationPlan,
    PlanError, ProgressEvent, RollbackOutcome, RunOutcome, Severity, Side, Stage, StageFailure,
};
pub use ledger::StageLedger;
pub use orchestrator::{MigrationError, MigrationOrchestrator, CANCELLED_MESSAGE};
pub use rollback::RollbackController;
pub use sink::ProgressSink;
pub use telemetry::init_tracing;

pub use orgmove_gateway::{DeviceGateway, OrgCredentials, Region};
pub use orgmove_state::{CheckpointStatus, CheckpointStore, PlanDigest, StageCheckpoint};

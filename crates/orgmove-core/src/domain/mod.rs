//! Domain model for orgmove.
//!
//! - `MigrationPlan` / `DeviceRef`: immutable run input
//! - `Stage`: ordered stage cursor values
//! - `ProgressEvent`: progress log entries
//! - `RunOutcome`, `StageFailure`, `RollbackOutcome`: terminal values

pub mod error;
pub mod event;
pub mod outcome;
pub mod plan;
pub mod stage;

pub use error::{LedgerError, PlanError, Side};
pub use event::{EventDraft, ProgressEvent, Severity};
pub use outcome::{CompensationWarning, FailedDevice, RollbackOutcome, RunOutcome, StageFailure};
pub use plan::{DeviceRef, MigrationPlan, DEST_API_KEY_ENV, SOURCE_API_KEY_ENV};
pub use stage::Stage;

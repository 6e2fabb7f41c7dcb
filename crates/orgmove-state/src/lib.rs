//! orgmove-state: SurrealDB persistence for orgmove
//!
//! Durable home of the migration stage cursor. Every stage transition of a
//! run is written here keyed by the plan digest, so a process that crashes
//! mid-migration can be resumed or rolled back from the last completed
//! stage instead of losing track of a half-moved device.
//!
//! ## Layer 0 - Data/Persistence
//!
//! ## Key Components
//!
//! - `CheckpointStore`: backend-agnostic trait
//! - `SurrealCheckpointStore`: SurrealDB implementation (memory, local, cloud)
//! - `fakes::MemoryCheckpointStore`: in-memory fake for tests

mod error;
pub mod fakes;
pub mod handle;
pub mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use handle::CloudConfig;
pub use schema::CheckpointRow;
pub use storage_traits::{
    CheckpointStatus, CheckpointStore, PlanDigest, StageCheckpoint, StorageResult,
    MAX_STAGE_INDEX,
};
pub use surreal_store::SurrealCheckpointStore;

/// Result type for orgmove-state operations
pub type Result<T> = std::result::Result<T, StateError>;

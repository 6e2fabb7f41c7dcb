//! Error types for orgmove-state

use thiserror::Error;

/// Errors raised while connecting to or initialising the database
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Serialization(err.to_string())
    }
}

/// Errors surfaced through the [`crate::CheckpointStore`] trait
#[derive(Error, Debug)]
pub enum StorageError {
    /// A digest string that is not 64 hex characters
    #[error("invalid plan digest: {digest}")]
    InvalidDigest { digest: String },

    /// A stored stage index outside the known stage range
    #[error("invalid stage index {stage} for plan {plan_id}")]
    InvalidStage { plan_id: String, stage: u8 },

    /// A stored status string that no longer maps to a known status
    #[error("unknown checkpoint status: {0}")]
    UnknownStatus(String),

    /// Backend failure (query, connection, serialization)
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StateError> for StorageError {
    fn from(err: StateError) -> Self {
        StorageError::Backend(err.to_string())
    }
}

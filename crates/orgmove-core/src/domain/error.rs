//! Domain-level error taxonomy for orgmove.

use super::stage::Stage;

/// Which side of a migration a credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Destination,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Source => f.write_str("source"),
            Side::Destination => f.write_str("destination"),
        }
    }
}

/// Errors produced while loading or validating a migration plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("plan must list at least one device")]
    NoDevices,

    #[error("device #{index} has an empty serial")]
    EmptySerial { index: usize },

    #[error("device serial {0} appears more than once")]
    DuplicateSerial(String),

    #[error("{side} credentials are missing an API key")]
    MissingApiKey { side: Side },

    #[error("{side} credentials are missing an organization id")]
    MissingOrgId { side: Side },

    #[error("destination credentials are missing a network id")]
    MissingDestinationNetwork,

    #[error("source and destination share network {0}")]
    SameNetwork(String),

    #[error("unknown stage index: {0}")]
    UnknownStage(u8),

    #[error("cannot read plan file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed plan: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors produced by the stage ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger cannot move backwards from {from} to {to}")]
    Regression { from: Stage, to: Stage },

    #[error("checkpoint records unknown stage {stage}")]
    CorruptCheckpoint { stage: u8 },

    #[error("checkpoint store: {0}")]
    Storage(#[from] orgmove_state::StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_error_names_the_side() {
        let err = PlanError::MissingApiKey {
            side: Side::Destination,
        };
        assert_eq!(err.to_string(), "destination credentials are missing an API key");
    }

    #[test]
    fn ledger_regression_display() {
        let err = LedgerError::Regression {
            from: Stage::ClaimedToDestination,
            to: Stage::RemovedFromSourceNetwork,
        };
        let msg = err.to_string();
        assert!(msg.contains("stage 3"));
        assert!(msg.contains("stage 1"));
    }
}

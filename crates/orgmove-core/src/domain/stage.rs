//! Migration stages.

use serde::{Deserialize, Serialize};

use super::error::PlanError;

/// Highest completed stage of a migration run.
///
/// Totally ordered: each value implies every lower stage has completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    None,
    RemovedFromSourceNetwork,
    UnclaimedFromSource,
    ClaimedToDestination,
    AddedToDestinationNetwork,
}

impl Stage {
    /// The four forward stages in execution order.
    pub const FORWARD: [Stage; 4] = [
        Stage::RemovedFromSourceNetwork,
        Stage::UnclaimedFromSource,
        Stage::ClaimedToDestination,
        Stage::AddedToDestinationNetwork,
    ];

    /// Ordinal, `0` for [`Stage::None`] through `4`.
    pub fn index(self) -> u8 {
        match self {
            Stage::None => 0,
            Stage::RemovedFromSourceNetwork => 1,
            Stage::UnclaimedFromSource => 2,
            Stage::ClaimedToDestination => 3,
            Stage::AddedToDestinationNetwork => 4,
        }
    }

    /// Inverse of [`Stage::index`].
    pub fn from_index(index: u8) -> Result<Self, PlanError> {
        match index {
            0 => Ok(Stage::None),
            1 => Ok(Stage::RemovedFromSourceNetwork),
            2 => Ok(Stage::UnclaimedFromSource),
            3 => Ok(Stage::ClaimedToDestination),
            4 => Ok(Stage::AddedToDestinationNetwork),
            other => Err(PlanError::UnknownStage(other)),
        }
    }

    /// Stage that runs after this one, if any.
    pub fn next(self) -> Option<Stage> {
        Stage::from_index(self.index() + 1).ok()
    }

    /// Whether every forward stage has completed.
    pub fn is_complete(self) -> bool {
        self == Stage::AddedToDestinationNetwork
    }

    /// Operator-facing label.
    pub fn label(self) -> &'static str {
        match self {
            Stage::None => "not started",
            Stage::RemovedFromSourceNetwork => "remove from source network",
            Stage::UnclaimedFromSource => "unclaim from source inventory",
            Stage::ClaimedToDestination => "claim to destination inventory",
            Stage::AddedToDestinationNetwork => "add to destination network",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "stage {} ({})", self.index(), self.label())
    }
}

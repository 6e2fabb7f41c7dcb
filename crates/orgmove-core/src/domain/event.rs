//! Progress events: the append-only record of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::Stage;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Severity::Info => "info",
            Severity::Warn => "warn",
            Severity::Error => "error",
        })
    }
}

/// One line of the progress log. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Position in the log, starting at 0.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
    /// Stage the event relates to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    /// Device serial the event relates to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    /// Set on the entry recording an unverified operator override.
    #[serde(default)]
    pub operator_override: bool,
}

/// Fields of an event before the sink stamps `seq` and `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDraft {
    pub severity: Severity,
    pub message: String,
    pub stage: Option<Stage>,
    pub serial: Option<String>,
    pub operator_override: bool,
}

impl EventDraft {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            stage: None,
            serial: None,
            operator_override: false,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::new(Severity::Warn, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn serial(mut self, serial: impl Into<String>) -> Self {
        self.serial = Some(serial.into());
        self
    }

    pub fn operator_override(mut self) -> Self {
        self.operator_override = true;
        self
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{:<5}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.severity,
            self.message
        )?;
        if self.operator_override {
            f.write_str(" (operator override, unverified)")?;
        }
        Ok(())
    }
}

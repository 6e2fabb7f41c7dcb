//! Error types for orgmove-gateway

use thiserror::Error;

/// Errors returned by a [`crate::DeviceGateway`] operation.
///
/// `Display` output is surfaced verbatim to operators, so every variant
/// leads with the platform's own message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Non-success HTTP status with the platform's error messages
    #[error("{message} (HTTP {status})")]
    Api { status: u16, message: String },

    /// Still rate limited after exhausting retries
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// Connection, TLS or timeout failure before a response arrived
    #[error("transport error: {0}")]
    Transport(String),

    /// Operation refused without an HTTP status (fakes, local checks)
    #[error("{0}")]
    Rejected(String),

    /// Client could not be constructed
    #[error("gateway not configured: {0}")]
    NotConfigured(String),
}

impl GatewayError {
    /// Whether repeating the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::RateLimited { .. } | GatewayError::Transport(_) => true,
            GatewayError::Api { status, .. } => *status >= 500,
            GatewayError::Rejected(_) | GatewayError::NotConfigured(_) => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

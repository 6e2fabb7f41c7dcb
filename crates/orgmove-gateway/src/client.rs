//! Dashboard API client
//!
//! `reqwest`-backed [`DeviceGateway`] that talks to the region-specific
//! Dashboard host of each organization. Owns the remote-call policy:
//! per-request timeout, and bounded retry of HTTP 429 honouring
//! `Retry-After` (capped at the request timeout). Every other failure is
//! returned to the caller untouched.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::credentials::OrgCredentials;
use crate::error::GatewayError;
use crate::{DeviceGateway, Result};

/// Default per-request timeout
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default number of 429 retries per call
pub const DEFAULT_MAX_RETRIES: u32 = 3;
/// Wait used when a 429 carries no usable `Retry-After`
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Dashboard client configuration
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Overrides the region-derived base URL (proxies, tests)
    pub base_url: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
    /// Retries of HTTP 429 before giving up
    pub max_retries: u32,
    /// User-Agent header
    pub user_agent: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        DashboardConfig {
            base_url: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            user_agent: format!("orgmove/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl DashboardConfig {
    /// Create a new config from environment variables
    ///
    /// Reads `ORGMOVE_API_BASE_URL`, `ORGMOVE_HTTP_TIMEOUT_SECS` and
    /// `ORGMOVE_HTTP_MAX_RETRIES`; unset or unparsable values keep defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        DashboardConfig {
            base_url: std::env::var("ORGMOVE_API_BASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            timeout: std::env::var("ORGMOVE_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: std::env::var("ORGMOVE_HTTP_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            user_agent: defaults.user_agent,
        }
    }

    /// Route every request to `base_url` instead of the region host
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    /// Set the number of 429 retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Dashboard API client for device inventory/network operations
pub struct DashboardClient {
    config: DashboardConfig,
    http_client: reqwest::Client,
}

impl DashboardClient {
    /// Create a new Dashboard client
    pub fn new(config: DashboardConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::NotConfigured(e.to_string()))?;

        Ok(DashboardClient {
            config,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(DashboardConfig::from_env())
    }

    /// Borrow the active configuration.
    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    /// Full URL for `path` in the organization's region.
    pub fn url_for(&self, creds: &OrgCredentials, path: &str) -> String {
        let base = match &self.config.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => creds.region.base_url(),
        };
        format!("{}/{}", base, path.trim_start_matches('/'))
    }

    /// POST a JSON body, retrying on 429 up to `max_retries` times.
    async fn post(&self, creds: &OrgCredentials, path: &str, body: Value) -> Result<()> {
        let url = self.url_for(creds, path);
        let mut attempt: u32 = 0;

        loop {
            debug!(url = %url, attempt, key = %creds.key_hint(), "POST");

            let response = self
                .http_client
                .post(&url)
                .bearer_auth(&creds.api_key)
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if status == StatusCode::TOO_MANY_REQUESTS && attempt < self.config.max_retries {
                let wait = retry_wait(response.headers(), self.config.timeout);
                attempt += 1;
                warn!(
                    url = %url,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "rate limited, retrying"
                );
                tokio::time::sleep(wait).await;
                continue;
            }

            let text = response.text().await.unwrap_or_default();
            let message = error_message(&text)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(GatewayError::RateLimited { message });
            }
            return Err(GatewayError::Api {
                status: status.as_u16(),
                message,
            });
        }
    }
}

#[async_trait]
impl DeviceGateway for DashboardClient {
    async fn remove_from_network(
        &self,
        creds: &OrgCredentials,
        network_id: &str,
        serial: &str,
    ) -> Result<()> {
        info!(network_id, serial, "removing device from network");
        self.post(
            creds,
            &format!("networks/{network_id}/devices/remove"),
            json!({ "serial": serial }),
        )
        .await
    }

    async fn unclaim_from_inventory(
        &self,
        creds: &OrgCredentials,
        org_id: &str,
        serials: &[String],
    ) -> Result<()> {
        info!(org_id, count = serials.len(), "releasing devices from inventory");
        self.post(
            creds,
            &format!("organizations/{org_id}/inventory/release"),
            json!({ "serials": serials }),
        )
        .await
    }

    async fn claim_to_inventory(
        &self,
        creds: &OrgCredentials,
        org_id: &str,
        serials: &[String],
    ) -> Result<()> {
        info!(org_id, count = serials.len(), "claiming devices into inventory");
        self.post(
            creds,
            &format!("organizations/{org_id}/inventory/claim"),
            json!({ "serials": serials }),
        )
        .await
    }

    async fn add_to_network(
        &self,
        creds: &OrgCredentials,
        network_id: &str,
        serials: &[String],
    ) -> Result<()> {
        info!(network_id, count = serials.len(), "adding devices to network");
        self.post(
            creds,
            &format!("networks/{network_id}/devices/claim"),
            json!({ "serials": serials }),
        )
        .await
    }
}

/// Parse a `Retry-After` header given in whole seconds.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Wait before retrying a 429: the server's `Retry-After`, never longer than `cap`.
fn retry_wait(headers: &HeaderMap, cap: Duration) -> Duration {
    retry_after(headers).unwrap_or(DEFAULT_RETRY_AFTER).min(cap)
}

/// Extract `{"errors": [...]}` messages from an error body.
fn error_message(body: &str) -> Option<String> {
    #[derive(Deserialize)]
    struct ErrorBody {
        errors: Vec<String>,
    }

    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    if parsed.errors.is_empty() {
        None
    } else {
        Some(parsed.errors.join("; "))
    }
}

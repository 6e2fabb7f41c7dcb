//! orgmove-gateway: Device management gateway for orgmove
//!
//! The remote side of a migration: the four device operations the engine
//! drives (remove from network, unclaim, claim, add to network), the
//! credentials and region that scope them, the Dashboard HTTP client, and
//! an in-memory recording fake.
//!
//! ## Layer 1 - Remote API
//!
//! Timeout and rate-limit retry policy lives here, not in the engine.

pub mod client;
pub mod credentials;
pub mod error;
pub mod fakes;
pub mod region;

use async_trait::async_trait;

pub use client::{DashboardClient, DashboardConfig};
pub use credentials::OrgCredentials;
pub use error::GatewayError;
pub use region::Region;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Remote device-management operations, scoped by organization/network.
///
/// Implementations must be shareable across concurrent runs and should
/// make each call as idempotent as the platform allows. Errors are
/// surfaced to operators through their `Display` output.
#[async_trait]
pub trait DeviceGateway: Send + Sync {
    /// Detach a single device from a network.
    async fn remove_from_network(
        &self,
        creds: &OrgCredentials,
        network_id: &str,
        serial: &str,
    ) -> Result<()>;

    /// Release devices from an organization's inventory.
    async fn unclaim_from_inventory(
        &self,
        creds: &OrgCredentials,
        org_id: &str,
        serials: &[String],
    ) -> Result<()>;

    /// Claim devices into an organization's inventory.
    async fn claim_to_inventory(
        &self,
        creds: &OrgCredentials,
        org_id: &str,
        serials: &[String],
    ) -> Result<()>;

    /// Add inventory devices to a network.
    async fn add_to_network(
        &self,
        creds: &OrgCredentials,
        network_id: &str,
        serials: &[String],
    ) -> Result<()>;
}

//! Migration plan: the immutable input to a run.

use std::collections::HashSet;
use std::path::Path;

use orgmove_gateway::OrgCredentials;
use orgmove_state::PlanDigest;
use serde::{Deserialize, Serialize};

use super::error::{PlanError, Side};

/// Environment variable that supplies the source API key when the plan omits it.
pub const SOURCE_API_KEY_ENV: &str = "ORGMOVE_SOURCE_API_KEY";
/// Environment variable that supplies the destination API key when the plan omits it.
pub const DEST_API_KEY_ENV: &str = "ORGMOVE_DEST_API_KEY";

/// A device selected for migration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRef {
    pub serial: String,
    #[serde(default)]
    pub name: String,
    /// Network the device is currently assigned to in the source org.
    #[serde(default, alias = "networkId")]
    pub network_id: Option<String>,
}

impl DeviceRef {
    pub fn new(serial: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            name: name.into(),
            network_id: None,
        }
    }

    pub fn in_network(mut self, network_id: impl Into<String>) -> Self {
        self.network_id = Some(network_id.into());
        self
    }

    /// Current network, if set and non-blank. A blank id means unassigned.
    pub fn network(&self) -> Option<&str> {
        non_blank(self.network_id.as_deref())
    }

    /// Name if set, serial otherwise.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.serial
        } else {
            &self.name
        }
    }
}

/// Source and destination scope plus the devices to move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    #[serde(alias = "sourceCredentials", alias = "source_credentials")]
    pub source: OrgCredentials,
    #[serde(alias = "destinationCredentials", alias = "destination_credentials")]
    pub destination: OrgCredentials,
    pub devices: Vec<DeviceRef>,
}

impl MigrationPlan {
    pub fn new(source: OrgCredentials, destination: OrgCredentials, devices: Vec<DeviceRef>) -> Self {
        Self {
            source,
            destination,
            devices,
        }
    }

    /// Parse a plan from JSON text. Does not validate.
    pub fn from_json_str(json: &str) -> Result<Self, PlanError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a plan file. Does not validate.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Fill empty API keys from `ORGMOVE_SOURCE_API_KEY` / `ORGMOVE_DEST_API_KEY`.
    pub fn with_env_api_keys(mut self) -> Self {
        if self.source.api_key.is_empty() {
            if let Ok(key) = std::env::var(SOURCE_API_KEY_ENV) {
                self.source.api_key = key;
            }
        }
        if self.destination.api_key.is_empty() {
            if let Ok(key) = std::env::var(DEST_API_KEY_ENV) {
                self.destination.api_key = key;
            }
        }
        self
    }

    /// Reject plans that would fail mid-stage.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.devices.is_empty() {
            return Err(PlanError::NoDevices);
        }

        let mut seen = HashSet::new();
        for (index, device) in self.devices.iter().enumerate() {
            if device.serial.trim().is_empty() {
                return Err(PlanError::EmptySerial { index });
            }
            if !seen.insert(device.serial.as_str()) {
                return Err(PlanError::DuplicateSerial(device.serial.clone()));
            }
        }

        for (side, creds) in [(Side::Source, &self.source), (Side::Destination, &self.destination)] {
            if creds.api_key.trim().is_empty() {
                return Err(PlanError::MissingApiKey { side });
            }
            if creds.org_id.trim().is_empty() {
                return Err(PlanError::MissingOrgId { side });
            }
        }

        let dest_network = match self.destination_network() {
            Some(id) => id,
            None => return Err(PlanError::MissingDestinationNetwork),
        };
        let source_networks = self
            .source_network()
            .into_iter()
            .chain(self.devices.iter().filter_map(DeviceRef::network));
        for network in source_networks {
            if network.trim() == dest_network.trim() {
                return Err(PlanError::SameNetwork(network.to_string()));
            }
        }

        Ok(())
    }

    /// Destination network id, if set and non-empty.
    pub fn destination_network(&self) -> Option<&str> {
        non_blank(self.destination.network_id.as_deref())
    }

    /// Source network id, if set and non-empty.
    pub fn source_network(&self) -> Option<&str> {
        non_blank(self.source.network_id.as_deref())
    }

    /// All device serials in plan order.
    pub fn serials(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.serial.clone()).collect()
    }

    /// Stable identity of the plan, independent of API keys.
    ///
    /// SHA-256 over canonical JSON (sorted keys) of the scopes and devices.
    pub fn digest(&self) -> PlanDigest {
        let scope = |c: &OrgCredentials| {
            serde_json::json!({
                "region": c.region.as_str(),
                "org_id": c.org_id,
                "network_id": c.network_id,
            })
        };
        let devices: Vec<serde_json::Value> = self
            .devices
            .iter()
            .map(|d| {
                serde_json::json!({
                    "serial": d.serial,
                    "name": d.name,
                    "network_id": d.network_id,
                })
            })
            .collect();
        let canonical = serde_json::json!({
            "source": scope(&self.source),
            "destination": scope(&self.destination),
            "devices": devices,
        });
        PlanDigest::from_bytes(canonical.to_string().as_bytes())
    }
}

fn non_blank(id: Option<&str>) -> Option<&str> {
    id.filter(|id| !id.trim().is_empty())
}

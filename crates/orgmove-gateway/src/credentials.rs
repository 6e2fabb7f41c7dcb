//! Organization-scoped credentials

use serde::{Deserialize, Serialize};

use crate::region::Region;

/// API key plus the organization/network scope it is used against
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgCredentials {
    /// Dashboard API key. May be left empty in plan files and filled from
    /// the environment by the caller.
    #[serde(default)]
    pub api_key: String,
    /// Region hosting the organization
    #[serde(default)]
    pub region: Region,
    /// Organization identifier
    pub org_id: String,
    /// Network identifier, when the scope includes one
    #[serde(default)]
    pub network_id: Option<String>,
}

impl OrgCredentials {
    pub fn new(api_key: impl Into<String>, region: Region, org_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            region,
            org_id: org_id.into(),
            network_id: None,
        }
    }

    /// Scope the credentials to a network.
    pub fn with_network(mut self, network_id: impl Into<String>) -> Self {
        self.network_id = Some(network_id.into());
        self
    }

    /// Last four characters of the key, for logs.
    pub fn key_hint(&self) -> String {
        let n = self.api_key.chars().count();
        if n <= 4 {
            "****".to_string()
        } else {
            let tail: String = self.api_key.chars().skip(n - 4).collect();
            format!("****{tail}")
        }
    }
}

impl std::fmt::Debug for OrgCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrgCredentials")
            .field("api_key", &self.key_hint())
            .field("region", &self.region)
            .field("org_id", &self.org_id)
            .field("network_id", &self.network_id)
            .finish()
    }
}

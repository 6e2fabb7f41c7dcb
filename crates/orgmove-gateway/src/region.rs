//! Dashboard API regions
//!
//! Each region is an independent API deployment with its own host.
//! Organizations live in exactly one region, so a migration may talk to
//! two different hosts.

use serde::{Deserialize, Serialize};

use crate::error::GatewayError;

/// Dashboard API deployment an organization lives in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    #[default]
    #[serde(alias = "com")]
    Global,
    #[serde(alias = "ca")]
    Canada,
    #[serde(alias = "cn")]
    China,
    #[serde(alias = "in")]
    India,
    #[serde(alias = "gov")]
    Fedramp,
}

impl Region {
    /// All supported regions.
    pub const ALL: [Region; 5] = [
        Region::Global,
        Region::Canada,
        Region::China,
        Region::India,
        Region::Fedramp,
    ];

    /// API host for this region.
    pub fn host(&self) -> &'static str {
        match self {
            Region::Global => "api.meraki.com",
            Region::Canada => "api.meraki.ca",
            Region::China => "api.meraki.cn",
            Region::India => "api.meraki.in",
            Region::Fedramp => "api.gov-meraki.com",
        }
    }

    /// Versioned API base URL, without a trailing slash.
    pub fn base_url(&self) -> String {
        format!("https://{}/api/v1", self.host())
    }

    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Global => "global",
            Region::Canada => "canada",
            Region::China => "china",
            Region::India => "india",
            Region::Fedramp => "fedramp",
        }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Region {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" | "com" => Ok(Region::Global),
            "canada" | "ca" => Ok(Region::Canada),
            "china" | "cn" => Ok(Region::China),
            "india" | "in" => Ok(Region::India),
            "fedramp" | "gov" => Ok(Region::Fedramp),
            other => Err(GatewayError::NotConfigured(format!("unknown region: {other}"))),
        }
    }
}

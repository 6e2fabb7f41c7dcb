//! In-memory gateway fake (testing only)
//!
//! `RecordingGateway` records every call in dispatch order and fails calls
//! according to scripted rules, so engine tests can assert exact remote
//! sequencing and call counts without a network.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::credentials::OrgCredentials;
use crate::error::GatewayError;
use crate::{DeviceGateway, Result};

/// Gateway operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    RemoveFromNetwork,
    UnclaimFromInventory,
    ClaimToInventory,
    AddToNetwork,
}

/// A single recorded gateway call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    RemoveFromNetwork {
        org_id: String,
        network_id: String,
        serial: String,
    },
    UnclaimFromInventory {
        org_id: String,
        serials: Vec<String>,
    },
    ClaimToInventory {
        org_id: String,
        serials: Vec<String>,
    },
    AddToNetwork {
        org_id: String,
        network_id: String,
        serials: Vec<String>,
    },
}

impl GatewayCall {
    pub fn operation(&self) -> Operation {
        match self {
            GatewayCall::RemoveFromNetwork { .. } => Operation::RemoveFromNetwork,
            GatewayCall::UnclaimFromInventory { .. } => Operation::UnclaimFromInventory,
            GatewayCall::ClaimToInventory { .. } => Operation::ClaimToInventory,
            GatewayCall::AddToNetwork { .. } => Operation::AddToNetwork,
        }
    }

    /// Organization whose credentials were used.
    pub fn org_id(&self) -> &str {
        match self {
            GatewayCall::RemoveFromNetwork { org_id, .. }
            | GatewayCall::UnclaimFromInventory { org_id, .. }
            | GatewayCall::ClaimToInventory { org_id, .. }
            | GatewayCall::AddToNetwork { org_id, .. } => org_id,
        }
    }
}

#[derive(Debug, Clone)]
struct FailureRule {
    operation: Operation,
    org_id: Option<String>,
    serial: Option<String>,
    error: GatewayError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

impl FailureRule {
    fn matches(&self, call: &GatewayCall) -> bool {
        if self.operation != call.operation() {
            return false;
        }
        if let Some(org) = &self.org_id {
            if org != call.org_id() {
                return false;
            }
        }
        if let Some(serial) = &self.serial {
            let hit = match call {
                GatewayCall::RemoveFromNetwork { serial: s, .. } => s == serial,
                GatewayCall::UnclaimFromInventory { serials, .. }
                | GatewayCall::ClaimToInventory { serials, .. }
                | GatewayCall::AddToNetwork { serials, .. } => serials.contains(serial),
            };
            if !hit {
                return false;
            }
        }
        self.remaining != Some(0)
    }
}

fn rejected(message: &str) -> GatewayError {
    GatewayError::Rejected(message.to_string())
}

/// Recording, scriptable [`DeviceGateway`].
#[derive(Debug, Default)]
pub struct RecordingGateway {
    calls: Mutex<Vec<GatewayCall>>,
    rules: Mutex<Vec<FailureRule>>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every call of `operation`.
    pub fn fail(&self, operation: Operation, message: &str) {
        self.push_rule(operation, None, None, rejected(message), None);
    }

    /// Fail the next call of `operation` only.
    pub fn fail_once(&self, operation: Operation, message: &str) {
        self.push_rule(operation, None, None, rejected(message), Some(1));
    }

    /// Fail every call of `operation` with `error`.
    pub fn fail_with(&self, operation: Operation, error: GatewayError) {
        self.push_rule(operation, None, None, error, None);
    }

    /// Fail the next call of `operation` with `error`.
    pub fn fail_once_with(&self, operation: Operation, error: GatewayError) {
        self.push_rule(operation, None, None, error, Some(1));
    }

    /// Fail every call of `operation` that touches `serial`.
    pub fn fail_serial(&self, operation: Operation, serial: &str, message: &str) {
        self.push_rule(operation, None, Some(serial.to_string()), rejected(message), None);
    }

    /// Fail every call of `operation` made with `org_id` credentials.
    pub fn fail_in_org(&self, operation: Operation, org_id: &str, message: &str) {
        self.push_rule(operation, Some(org_id.to_string()), None, rejected(message), None);
    }

    /// Drop all failure rules.
    pub fn clear_failures(&self) {
        self.rules.lock().unwrap().clear();
    }

    /// All calls so far, in dispatch order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Operation kinds so far, in dispatch order.
    pub fn operations(&self) -> Vec<Operation> {
        self.calls().iter().map(GatewayCall::operation).collect()
    }

    /// Number of calls of `operation`.
    pub fn count(&self, operation: Operation) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    /// Forget recorded calls (failure rules are kept).
    pub fn reset_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn push_rule(
        &self,
        operation: Operation,
        org_id: Option<String>,
        serial: Option<String>,
        error: GatewayError,
        remaining: Option<u32>,
    ) {
        self.rules.lock().unwrap().push(FailureRule {
            operation,
            org_id,
            serial,
            error,
            remaining,
        });
    }

    fn dispatch(&self, call: GatewayCall) -> Result<()> {
        let outcome = {
            let mut rules = self.rules.lock().unwrap();
            match rules.iter_mut().find(|r| r.matches(&call)) {
                Some(rule) => {
                    if let Some(n) = rule.remaining.as_mut() {
                        *n -= 1;
                    }
                    Err(rule.error.clone())
                }
                None => Ok(()),
            }
        };
        self.calls.lock().unwrap().push(call);
        outcome
    }
}

#[async_trait]
impl DeviceGateway for RecordingGateway {
    async fn remove_from_network(
        &self,
        creds: &OrgCredentials,
        network_id: &str,
        serial: &str,
    ) -> Result<()> {
        self.dispatch(GatewayCall::RemoveFromNetwork {
            org_id: creds.org_id.clone(),
            network_id: network_id.to_string(),
            serial: serial.to_string(),
        })
    }

    async fn unclaim_from_inventory(
        &self,
        _creds: &OrgCredentials,
        org_id: &str,
        serials: &[String],
    ) -> Result<()> {
        self.dispatch(GatewayCall::UnclaimFromInventory {
            org_id: org_id.to_string(),
            serials: serials.to_vec(),
        })
    }

    async fn claim_to_inventory(
        &self,
        _creds: &OrgCredentials,
        org_id: &str,
        serials: &[String],
    ) -> Result<()> {
        self.dispatch(GatewayCall::ClaimToInventory {
            org_id: org_id.to_string(),
            serials: serials.to_vec(),
        })
    }

    async fn add_to_network(
        &self,
        creds: &OrgCredentials,
        network_id: &str,
        serials: &[String],
    ) -> Result<()> {
        self.dispatch(GatewayCall::AddToNetwork {
            org_id: creds.org_id.clone(),
            network_id: network_id.to_string(),
            serials: serials.to_vec(),
        })
    }
}

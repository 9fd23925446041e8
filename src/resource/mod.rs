//! Normalized resource descriptors.
//!
//! All enumerators produce an `Inventory`. All rules consume an `Inventory`.
//! Provider responses are mapped onto explicit optional-field structs so a
//! field the API omitted stays `None` instead of picking up a guessed default.

pub mod compute;
pub mod network;
pub mod storage;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::PostureError;

pub use compute::{PublicIpBinding, UnresolvedReference, VirtualMachine, VmProperties};
pub use network::{NetworkSecurityGroup, NsgProperties, SecurityRule};
pub use storage::{Encryption, EncryptionService, EncryptionServices, StorageAccount, StorageProperties};

/// Enumerator category. Findings carry it as `service`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Service {
    #[serde(rename = "storage")]
    Storage,
    #[serde(rename = "vms")]
    VirtualMachines,
    #[serde(rename = "nsgs")]
    NetworkSecurityGroups,
}

impl Service {
    pub const ALL: [Service; 3] = [
        Service::Storage,
        Service::VirtualMachines,
        Service::NetworkSecurityGroups,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::VirtualMachines => "vms",
            Self::NetworkSecurityGroups => "nsgs",
        }
    }
}

impl std::fmt::Display for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Service {
    type Err = PostureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Service::ALL
            .into_iter()
            .find(|svc| svc.as_str() == s)
            .ok_or_else(|| PostureError::Validation(format!("unknown service '{s}'")))
    }
}

/// Snapshot of one cloud resource taken at enumeration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor<P> {
    pub id: String,
    pub name: String,
    pub resource_group: Option<String>,
    pub properties: P,
}

impl<P> ResourceDescriptor<P> {
    /// Build a descriptor, deriving the resource group from the ARM id.
    pub fn new(id: impl Into<String>, name: impl Into<String>, properties: P) -> Self {
        let id = id.into();
        let resource_group = resource_group_from_id(&id);
        Self {
            id,
            name: name.into(),
            resource_group,
            properties,
        }
    }
}

/// Output of one enumerator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "service", content = "resources")]
pub enum Inventory {
    #[serde(rename = "storage")]
    Storage(Vec<StorageAccount>),
    #[serde(rename = "vms")]
    VirtualMachines(Vec<VirtualMachine>),
    #[serde(rename = "nsgs")]
    NetworkSecurityGroups(Vec<NetworkSecurityGroup>),
}

impl Inventory {
    pub fn service(&self) -> Service {
        match self {
            Self::Storage(_) => Service::Storage,
            Self::VirtualMachines(_) => Service::VirtualMachines,
            Self::NetworkSecurityGroups(_) => Service::NetworkSecurityGroups,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Storage(items) => items.len(),
            Self::VirtualMachines(items) => items.len(),
            Self::NetworkSecurityGroups(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static RESOURCE_GROUP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/resourceGroups/([^/]+)").unwrap());

/// Extract the resource group from an ARM id such as
/// `/subscriptions/<sub>/resourceGroups/<rg>/providers/...`.
pub fn resource_group_from_id(id: &str) -> Option<String> {
    RESOURCE_GROUP_RE
        .captures(id)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Last path segment of an ARM id (the resource's own name).
pub fn name_from_id(id: &str) -> &str {
    id.trim_end_matches('/').rsplit('/').next().unwrap_or(id)
}

/// Deserialize an optional provider field, mapping a malformed value to
/// `None` rather than failing the whole payload.
pub(crate) fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    match serde_json::from_value(value) {
        Ok(parsed) => Ok(Some(parsed)),
        Err(e) => {
            tracing::debug!(error = %e, "malformed provider field treated as absent");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_resource_group() {
        let id = "/subscriptions/0000/resourceGroups/rg-prod/providers/Microsoft.Storage/storageAccounts/acct";
        assert_eq!(resource_group_from_id(id).as_deref(), Some("rg-prod"));
    }

    #[test]
    fn resource_group_is_case_insensitive() {
        let id = "/subscriptions/0000/resourcegroups/RG1/providers/Microsoft.Network/networkInterfaces/nic1";
        assert_eq!(resource_group_from_id(id).as_deref(), Some("RG1"));
    }

    #[test]
    fn missing_resource_group() {
        assert_eq!(resource_group_from_id("storage-account-without-arm-id"), None);
    }

    #[test]
    fn name_is_last_segment() {
        let id = "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Network/networkInterfaces/nic1";
        assert_eq!(name_from_id(id), "nic1");
        assert_eq!(name_from_id("plain"), "plain");
    }

    #[test]
    fn service_round_trips_through_text() {
        for service in Service::ALL {
            let parsed: Service = service.as_str().parse().unwrap();
            assert_eq!(parsed, service);
        }
        assert!("functions".parse::<Service>().is_err());
    }

    #[test]
    fn inventory_reports_service() {
        let inventory = Inventory::NetworkSecurityGroups(vec![]);
        assert_eq!(inventory.service(), Service::NetworkSecurityGroups);
        assert!(inventory.is_empty());
    }
}

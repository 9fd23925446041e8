use serde::{Deserialize, Serialize};

use super::ResourceDescriptor;

/// A network security group with its custom security rules.
pub type NetworkSecurityGroup = ResourceDescriptor<NsgProperties>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NsgProperties {
    /// Unordered. Azure's priority evaluation is not modelled.
    #[serde(default)]
    pub security_rules: Vec<SecurityRule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub name: String,
    pub source_address_prefix: Option<String>,
    pub destination_port_range: Option<String>,
    pub protocol: Option<String>,
    /// "Allow" or "Deny".
    pub access: Option<String>,
    /// "Inbound" or "Outbound".
    pub direction: Option<String>,
    pub priority: Option<i64>,
}

impl SecurityRule {
    pub fn new(
        name: impl Into<String>,
        source_address_prefix: Option<&str>,
        destination_port_range: Option<&str>,
    ) -> Self {
        Self {
            name: name.into(),
            source_address_prefix: source_address_prefix.map(str::to_string),
            destination_port_range: destination_port_range.map(str::to_string),
            ..Default::default()
        }
    }
}

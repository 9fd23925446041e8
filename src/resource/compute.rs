use serde::{Deserialize, Serialize};

use super::ResourceDescriptor;

/// A virtual machine with its public IPs already resolved.
pub type VirtualMachine = ResourceDescriptor<VmProperties>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VmProperties {
    /// ARM ids of the attached network interfaces.
    #[serde(default)]
    pub network_interfaces: Vec<String>,
    /// Public IPs reachable through those interfaces. Empty is the common case.
    #[serde(default)]
    pub public_ips: Vec<PublicIpBinding>,
    /// NIC or public IP lookups that failed. The VM is still reported with
    /// whatever could be resolved.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved: Vec<UnresolvedReference>,
}

/// One public IP attached to one of the VM's network interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicIpBinding {
    /// Network interface name.
    pub nic: String,
    /// Allocated address; `None` for a dynamic IP that is not yet assigned.
    pub public_ip: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReference {
    pub reference: String,
    pub error: String,
}

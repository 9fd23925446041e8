use serde_json::json;

use crate::resource::{Inventory, Service, VirtualMachine};
use crate::rules::{Finding, Rule, RuleMetadata, Severity};

const RULE_ID: &str = "AZ-VM-PUBIP-001";

/// AZ-VM-PUBIP-001: VM has public IP(s)
///
/// One Medium finding per VM whose resolved `public_ips` list is non-empty.
pub struct VmPublicIpRule;

impl VmPublicIpRule {
    pub fn check(&self, vms: &[VirtualMachine]) -> Vec<Finding> {
        vms.iter()
            .filter(|vm| !vm.properties.public_ips.is_empty())
            .map(|vm| {
                let mut evidence = json!({ "public_ips": vm.properties.public_ips });
                if !vm.properties.unresolved.is_empty() {
                    evidence["unresolved"] = json!(vm.properties.unresolved);
                }

                Finding::new(
                    RULE_ID,
                    Service::VirtualMachines,
                    &vm.id,
                    "VM has public IP(s)",
                    Severity::Medium,
                )
                .with_resource(&vm.name, vm.resource_group.as_deref())
                .with_evidence(evidence)
                .with_remediation([
                    "Remove public IP from NIC if not required",
                    "Use Azure Bastion or VPN instead of public IP",
                ])
            })
            .collect()
    }
}

impl Rule for VmPublicIpRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: RULE_ID.into(),
            name: "VM Public IP".into(),
            description: "Virtual machine is directly reachable through a public IP address"
                .into(),
            default_severity: Severity::Medium,
            service: Service::VirtualMachines,
        }
    }

    fn evaluate(&self, inventory: &Inventory) -> Vec<Finding> {
        match inventory {
            Inventory::VirtualMachines(vms) => self.check(vms),
            _ => Vec::new(),
        }
    }
}

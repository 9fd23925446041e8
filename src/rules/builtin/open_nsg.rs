use serde_json::json;

use crate::resource::{Inventory, NetworkSecurityGroup, SecurityRule, Service};
use crate::rules::{Finding, Rule, RuleMetadata, Severity};

const RULE_ID: &str = "AZ-NSG-OPEN-001";

/// Source prefixes that mean "anywhere".
pub const ANYWHERE_PREFIXES: [&str; 3] = ["*", "0.0.0.0/0", "Internet"];

/// Destination ports considered sensitive: SSH, RDP, or all ports.
pub const SENSITIVE_PORTS: [&str; 3] = ["22", "3389", "*"];

/// AZ-NSG-OPEN-001: NSG rule open to the internet on a sensitive port
///
/// Every rule of every NSG is evaluated independently, one finding per
/// matching rule. Matching is exact on the rule's single source prefix and
/// single destination port range.
pub struct OpenNsgRule;

impl OpenNsgRule {
    pub fn check(&self, nsgs: &[NetworkSecurityGroup]) -> Vec<Finding> {
        let mut findings = Vec::new();

        for nsg in nsgs {
            for rule in &nsg.properties.security_rules {
                let (Some(src), Some(port)) = (exposed_source(rule), sensitive_port(rule)) else {
                    continue;
                };

                findings.push(
                    Finding::new(
                        RULE_ID,
                        Service::NetworkSecurityGroups,
                        &nsg.id,
                        format!("NSG allows {src} to port {port}"),
                        Severity::High,
                    )
                    .with_resource(&nsg.name, nsg.resource_group.as_deref())
                    .with_evidence(json!({
                        "nsg_name": nsg.name,
                        "rule_name": rule.name,
                        "source_address_prefix": src,
                        "destination_port_range": port,
                        "access": rule.access,
                        "direction": rule.direction,
                    }))
                    .with_remediation([
                        format!(
                            "Restrict NSG rule {} on {} to only trusted IP ranges.",
                            rule.name, nsg.name
                        ),
                        "Use Just-In-Time access or Azure Bastion for admin access.".to_string(),
                    ]),
                );
            }
        }

        findings
    }
}

fn exposed_source(rule: &SecurityRule) -> Option<&str> {
    rule.source_address_prefix
        .as_deref()
        .filter(|src| ANYWHERE_PREFIXES.contains(src))
}

fn sensitive_port(rule: &SecurityRule) -> Option<&str> {
    rule.destination_port_range
        .as_deref()
        .filter(|port| SENSITIVE_PORTS.contains(port))
}

impl Rule for OpenNsgRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: RULE_ID.into(),
            name: "Open NSG Rule".into(),
            description: "NSG rule allows traffic from anywhere to SSH, RDP, or all ports".into(),
            default_severity: Severity::High,
            service: Service::NetworkSecurityGroups,
        }
    }

    fn evaluate(&self, inventory: &Inventory) -> Vec<Finding> {
        match inventory {
            Inventory::NetworkSecurityGroups(nsgs) => self.check(nsgs),
            _ => Vec::new(),
        }
    }
}

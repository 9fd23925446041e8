pub mod builtin;
pub mod finding;
pub mod policy;

use crate::resource::Inventory;

pub use finding::{Finding, RuleMetadata, Severity, ERROR_RULE_ID};

/// A rule inspects one enumerator's inventory and produces findings.
///
/// Rules are pure: no I/O, deterministic, and total over their input. A
/// field that is missing or malformed counts as "not configured".
pub trait Rule: Send + Sync {
    /// Metadata about this rule (id, name, severity, input service).
    fn metadata(&self) -> RuleMetadata;

    /// Evaluate the rule. Inventories for other services yield nothing.
    fn evaluate(&self, inventory: &Inventory) -> Vec<Finding>;
}

/// Runs every registered rule that consumes a given inventory.
pub struct RuleEngine {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleEngine {
    /// Create a new engine with all built-in rules registered.
    pub fn new() -> Self {
        Self {
            rules: builtin::all_rules(),
        }
    }

    pub fn with_rules(rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules }
    }

    /// Route an inventory to the rules for its service, concatenating their
    /// findings in registration order.
    pub fn evaluate(&self, inventory: &Inventory) -> Vec<Finding> {
        let service = inventory.service();
        self.rules
            .iter()
            .filter(|r| r.metadata().service == service)
            .flat_map(|r| r.evaluate(inventory))
            .collect()
    }

    /// List metadata for all registered rules.
    pub fn list_rules(&self) -> Vec<RuleMetadata> {
        self.rules.iter().map(|r| r.metadata()).collect()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ResourceDescriptor, Service, StorageProperties};

    #[test]
    fn storage_routes_to_both_storage_rules() {
        let engine = RuleEngine::new();
        let inventory = Inventory::Storage(vec![ResourceDescriptor::new(
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Storage/storageAccounts/open",
            "open",
            Some(StorageProperties {
                allow_blob_public_access: Some(true),
                encryption: None,
            }),
        )]);

        let ids: Vec<String> = engine
            .evaluate(&inventory)
            .into_iter()
            .map(|f| f.rule_id)
            .collect();
        assert_eq!(ids, vec!["AZ-Storage-PublicBlob-001", "AZ-Storage-Encryption-001"]);
    }

    #[test]
    fn empty_inventory_yields_nothing() {
        let engine = RuleEngine::new();
        for inventory in [
            Inventory::Storage(vec![]),
            Inventory::VirtualMachines(vec![]),
            Inventory::NetworkSecurityGroups(vec![]),
        ] {
            assert!(engine.evaluate(&inventory).is_empty());
        }
    }

    #[test]
    fn every_service_has_a_rule() {
        let rules = RuleEngine::new().list_rules();
        assert_eq!(rules.len(), 4);
        for service in Service::ALL {
            assert!(rules.iter().any(|r| r.service == service));
        }
    }
}

use serde_json::json;

use crate::resource::{Inventory, Service, StorageAccount};
use crate::rules::{Finding, Rule, RuleMetadata, Severity};

const RULE_ID: &str = "AZ-Storage-PublicBlob-001";

/// AZ-Storage-PublicBlob-001: Storage account allows public blob access
///
/// Only an explicit `allow_blob_public_access = true` is flagged. Unknown
/// and explicit `false` both pass.
pub struct PublicBlobAccessRule;

impl PublicBlobAccessRule {
    pub fn check(&self, accounts: &[StorageAccount]) -> Vec<Finding> {
        accounts
            .iter()
            .filter(|sa| {
                sa.properties
                    .as_ref()
                    .and_then(|p| p.allow_blob_public_access)
                    == Some(true)
            })
            .map(|sa| {
                Finding::new(
                    RULE_ID,
                    Service::Storage,
                    &sa.id,
                    "Storage account allows public blob access",
                    Severity::High,
                )
                .with_resource(&sa.name, sa.resource_group.as_deref())
                .with_evidence(json!({ "allow_blob_public_access": true }))
                .with_remediation([
                    "Set allow_blob_public_access on the storage account to false.",
                    "Audit containers and set container public access to 'private'.",
                ])
            })
            .collect()
    }
}

impl Rule for PublicBlobAccessRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: RULE_ID.into(),
            name: "Public Blob Access".into(),
            description: "Storage account permits anonymous read access to blobs".into(),
            default_severity: Severity::High,
            service: Service::Storage,
        }
    }

    fn evaluate(&self, inventory: &Inventory) -> Vec<Finding> {
        match inventory {
            Inventory::Storage(accounts) => self.check(accounts),
            _ => Vec::new(),
        }
    }
}

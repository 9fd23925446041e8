use serde_json::{Map, Value};

use crate::resource::{Encryption, Inventory, Service, StorageAccount};
use crate::rules::{Finding, Rule, RuleMetadata, Severity};

const RULE_ID: &str = "AZ-Storage-Encryption-001";

/// AZ-Storage-Encryption-001: Storage account encryption not enabled
///
/// Three branches, each High:
/// - no encryption configuration at all (including unreadable properties),
/// - encryption configured without any per-service settings,
/// - blob service encryption explicitly disabled.
///
/// Evidence carries only the values the API actually reported.
pub struct StorageEncryptionRule;

impl StorageEncryptionRule {
    pub fn check(&self, accounts: &[StorageAccount]) -> Vec<Finding> {
        accounts.iter().filter_map(|sa| self.check_account(sa)).collect()
    }

    fn check_account(&self, sa: &StorageAccount) -> Option<Finding> {
        let encryption = sa.properties.as_ref().and_then(|p| p.encryption.as_ref());

        let finding = match encryption {
            None => missing(sa, Map::new()),
            Some(enc) if !enc.has_service_settings() => missing(sa, key_evidence(enc)),
            Some(enc) => {
                let blob = enc.services.as_ref().and_then(|s| s.blob.as_ref())?;
                if blob.enabled != Some(false) {
                    return None;
                }
                let mut evidence = Map::new();
                evidence.insert("enabled".into(), Value::Bool(false));
                if let Some(ts) = &blob.last_enabled_time {
                    evidence.insert("last_enabled_time".into(), Value::String(ts.clone()));
                }
                base(sa, "Storage account blob encryption is not enabled")
                    .with_evidence(Value::Object(evidence))
                    .with_remediation(["Enable blob encryption for the storage account."])
            }
        };

        Some(finding)
    }
}

fn base(sa: &StorageAccount, title: &str) -> Finding {
    Finding::new(RULE_ID, Service::Storage, &sa.id, title, Severity::High)
        .with_resource(&sa.name, sa.resource_group.as_deref())
}

fn missing(sa: &StorageAccount, evidence: Map<String, Value>) -> Finding {
    base(sa, "Storage account does not have encryption enabled")
        .with_evidence(Value::Object(evidence))
        .with_remediation([
            "Enable encryption for the storage account using Azure-managed or customer-managed keys.",
        ])
}

fn key_evidence(enc: &Encryption) -> Map<String, Value> {
    let mut evidence = Map::new();
    if let Some(source) = &enc.key_source {
        evidence.insert("key_source".into(), Value::String(source.clone()));
    }
    if let Some(vault) = &enc.key_vault_properties {
        evidence.insert("key_vault_properties".into(), vault.clone());
    }
    evidence
}

impl Rule for StorageEncryptionRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: RULE_ID.into(),
            name: "Storage Encryption".into(),
            description: "Storage account lacks encryption settings or has blob encryption disabled"
                .into(),
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

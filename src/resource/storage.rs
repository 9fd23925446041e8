use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{lenient, ResourceDescriptor};

/// A storage account. `properties` is `None` when the per-account
/// properties fetch failed.
pub type StorageAccount = ResourceDescriptor<Option<StorageProperties>>;

/// Storage account settings the rules look at.
///
/// Accepts both the snake_case form this crate serializes and the camelCase
/// form Azure Resource Manager returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageProperties {
    /// Tri-state: `Some(true)` allowed, `Some(false)` denied, `None` unknown.
    #[serde(default, alias = "allowBlobPublicAccess", deserialize_with = "lenient")]
    pub allow_blob_public_access: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub encryption: Option<Encryption>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Encryption {
    /// e.g. "Microsoft.Storage" or "Microsoft.Keyvault".
    #[serde(default, alias = "keySource", deserialize_with = "lenient")]
    pub key_source: Option<String>,
    /// Customer-managed key location, kept verbatim.
    #[serde(
        default,
        alias = "keyvaultproperties",
        alias = "keyVaultProperties",
        deserialize_with = "lenient",
        skip_serializing_if = "Option::is_none"
    )]
    pub key_vault_properties: Option<Value>,
    #[serde(default, deserialize_with = "lenient")]
    pub services: Option<EncryptionServices>,
}

impl Encryption {
    /// Whether any per-service encryption settings were reported.
    pub fn has_service_settings(&self) -> bool {
        self.services.as_ref().is_some_and(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptionServices {
    #[serde(default, deserialize_with = "lenient")]
    pub blob: Option<EncryptionService>,
    #[serde(default, deserialize_with = "lenient")]
    pub file: Option<EncryptionService>,
    #[serde(default, deserialize_with = "lenient")]
    pub table: Option<EncryptionService>,
    #[serde(default, deserialize_with = "lenient")]
    pub queue: Option<EncryptionService>,
}

impl EncryptionServices {
    pub fn is_empty(&self) -> bool {
        self.blob.is_none() && self.file.is_none() && self.table.is_none() && self.queue.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptionService {
    #[serde(default, deserialize_with = "lenient")]
    pub enabled: Option<bool>,
    #[serde(default, alias = "lastEnabledTime", deserialize_with = "lenient")]
    pub last_enabled_time: Option<String>,
}

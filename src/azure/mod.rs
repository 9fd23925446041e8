//! Access to the Azure management plane.
//!
//! Enumerators only see the `ManagementApi` trait. `ArmClient` implements it
//! against the Azure Resource Manager REST API; tests substitute a fake.

pub mod client;

use std::fmt;

use crate::error::{PostureError, Result};
use crate::resource::{SecurityRule, StorageProperties};

pub use client::ArmClient;

/// Service principal credentials and target subscription.
///
/// Built once at process start and handed to the client by reference.
#[derive(Clone, Default)]
pub struct AzureCredentials {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub subscription_id: Option<String>,
}

impl AzureCredentials {
    pub fn new(
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        subscription_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            client_id: Some(client_id.into()),
            client_secret: Some(client_secret.into()),
            subscription_id: Some(subscription_id.into()),
        }
    }

    /// Names of the settings that are missing or blank.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("AZURE_TENANT_ID", &self.tenant_id),
            ("AZURE_CLIENT_ID", &self.client_id),
            ("AZURE_CLIENT_SECRET", &self.client_secret),
            ("AZURE_SUBSCRIPTION_ID", &self.subscription_id),
        ]
        .into_iter()
        .filter(|(_, v)| v.as_deref().map_or(true, |s| s.trim().is_empty()))
        .map(|(name, _)| name)
        .collect()
    }

    pub fn is_configured(&self) -> bool {
        self.missing().is_empty()
    }

    /// Fail fast with an access error naming what is missing.
    pub fn ensure_configured(&self) -> Result<()> {
        let missing = self.missing();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PostureError::Access(format!(
                "Azure credentials missing: set {}",
                missing.join(", ")
            )))
        }
    }
}

impl fmt::Debug for AzureCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

/// A resource as it appears in a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmRecord {
    pub id: String,
    pub name: String,
    pub network_interface_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicRecord {
    pub id: String,
    pub name: String,
    /// Public IP ids referenced by the NIC's IP configurations.
    pub public_ip_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIpRecord {
    pub id: String,
    pub name: String,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NsgRecord {
    pub id: String,
    pub name: String,
    pub security_rules: Vec<SecurityRule>,
}

/// Read-only calls the enumerators make against the management plane.
///
/// Implementations map authentication and authorization failures to
/// `PostureError::Access` and everything else to `PostureError::Transient`.
pub trait ManagementApi: Send + Sync {
    /// Whether credentials are configured at all. Checked before any call.
    fn ensure_configured(&self) -> Result<()>;

    fn list_storage_accounts(&self) -> Result<Vec<ResourceRef>>;

    /// Full properties of one storage account, by ARM id.
    fn get_storage_account(&self, id: &str) -> Result<StorageProperties>;

    fn list_virtual_machines(&self) -> Result<Vec<VmRecord>>;

    fn get_network_interface(&self, id: &str) -> Result<NicRecord>;

    fn get_public_ip_address(&self, id: &str) -> Result<PublicIpRecord>;

    fn list_network_security_groups(&self) -> Result<Vec<NsgRecord>>;
}

#[cfg(test)]
pub(crate) mod fake {
    //! In-memory `ManagementApi` for enumerator and engine tests.

    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    pub struct FakeApi {
        pub configured: bool,
        pub storage: Vec<ResourceRef>,
        pub storage_properties: HashMap<String, StorageProperties>,
        pub vms: Vec<VmRecord>,
        pub nics: HashMap<String, NicRecord>,
        pub public_ips: HashMap<String, PublicIpRecord>,
        pub nsgs: Vec<NsgRecord>,
        /// Services whose list call fails with a transient error.
        pub failing_lists: Vec<&'static str>,
    }

    impl FakeApi {
        pub fn configured() -> Self {
            Self {
                configured: true,
                ..Default::default()
            }
        }

        fn list_guard(&self, name: &'static str) -> Result<()> {
            if self.failing_lists.contains(&name) {
                return Err(PostureError::Transient(format!("{name} listing unavailable")));
            }
            Ok(())
        }
    }

    fn not_found(id: &str) -> PostureError {
        PostureError::Transient(format!("GET {id} returned 404 Not Found"))
    }

    impl ManagementApi for FakeApi {
        fn ensure_configured(&self) -> Result<()> {
            if self.configured {
                Ok(())
            } else {
                Err(PostureError::Access("creds missing".into()))
            }
        }

        fn list_storage_accounts(&self) -> Result<Vec<ResourceRef>> {
            self.list_guard("storage")?;
            Ok(self.storage.clone())
        }

        fn get_storage_account(&self, id: &str) -> Result<StorageProperties> {
            self.storage_properties
                .get(id)
                .cloned()
                .ok_or_else(|| not_found(id))
        }

        fn list_virtual_machines(&self) -> Result<Vec<VmRecord>> {
            self.list_guard("vms")?;
            Ok(self.vms.clone())
        }

        fn get_network_interface(&self, id: &str) -> Result<NicRecord> {
            self.nics.get(id).cloned().ok_or_else(|| not_found(id))
        }

        fn get_public_ip_address(&self, id: &str) -> Result<PublicIpRecord> {
            self.public_ips.get(id).cloned().ok_or_else(|| not_found(id))
        }

        fn list_network_security_groups(&self) -> Result<Vec<NsgRecord>> {
            self.list_guard("nsgs")?;
            Ok(self.nsgs.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_are_missing() {
        let mut creds = AzureCredentials::new("tenant", "client", "secret", "sub");
        assert!(creds.is_configured());

        creds.client_secret = Some("  ".into());
        creds.subscription_id = None;
        assert_eq!(creds.missing(), vec!["AZURE_CLIENT_SECRET", "AZURE_SUBSCRIPTION_ID"]);

        let err = creds.ensure_configured().unwrap_err();
        assert!(matches!(err, PostureError::Access(_)));
        assert!(err.to_string().contains("AZURE_CLIENT_SECRET"));
    }

    #[test]
    fn debug_redacts_secret() {
        let creds = AzureCredentials::new("tenant", "client", "hunter2", "sub");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }
}

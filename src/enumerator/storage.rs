use std::sync::Arc;

use tracing::{debug, warn};

use super::Enumerator;
use crate::azure::ManagementApi;
use crate::error::Result;
use crate::resource::{Inventory, ResourceDescriptor, Service, StorageAccount};

/// Lists storage accounts, then fetches each account's full properties.
///
/// A failed properties fetch leaves that account with `properties = None`;
/// the remaining accounts are still resolved.
pub struct StorageEnumerator {
    api: Arc<dyn ManagementApi>,
}

impl StorageEnumerator {
    pub fn new(api: Arc<dyn ManagementApi>) -> Self {
        Self { api }
    }
}

impl Enumerator for StorageEnumerator {
    fn service(&self) -> Service {
        Service::Storage
    }

    fn enumerate(&self) -> Result<Inventory> {
        self.api.ensure_configured()?;

        let refs = self.api.list_storage_accounts()?;
        debug!(count = refs.len(), "listed storage accounts");

        let accounts: Vec<StorageAccount> = refs
            .into_iter()
            .map(|r| {
                let properties = match self.api.get_storage_account(&r.id) {
                    Ok(props) => Some(props),
                    Err(e) => {
                        warn!(account = %r.name, error = %e, "storage properties unavailable");
                        None
                    }
                };
                ResourceDescriptor::new(r.id, r.name, properties)
            })
            .collect();

        Ok(Inventory::Storage(accounts))
    }
}

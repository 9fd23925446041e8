use std::sync::Arc;

use tracing::debug;

use super::Enumerator;
use crate::azure::ManagementApi;
use crate::error::Result;
use crate::resource::{Inventory, NsgProperties, ResourceDescriptor, Service};

/// Lists every network security group in the subscription with its rules.
pub struct NsgEnumerator {
    api: Arc<dyn ManagementApi>,
}

impl NsgEnumerator {
    pub fn new(api: Arc<dyn ManagementApi>) -> Self {
        Self { api }
    }
}

impl Enumerator for NsgEnumerator {
    fn service(&self) -> Service {
        Service::NetworkSecurityGroups
    }

    fn enumerate(&self) -> Result<Inventory> {
        self.api.ensure_configured()?;

        let records = self.api.list_network_security_groups()?;
        debug!(count = records.len(), "listed network security groups");

        let nsgs = records
            .into_iter()
            .map(|r| {
                ResourceDescriptor::new(
                    r.id,
                    r.name,
                    NsgProperties {
                        security_rules: r.security_rules,
                    },
                )
            })
            .collect();

        Ok(Inventory::NetworkSecurityGroups(nsgs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::fake::FakeApi;
    use crate::azure::NsgRecord;
    use crate::resource::SecurityRule;

    #[test]
    fn carries_rules_through() {
        let mut api = FakeApi::configured();
        api.nsgs = vec![NsgRecord {
            id: "/subscriptions/s/resourceGroups/net/providers/Microsoft.Network/networkSecurityGroups/edge".into(),
            name: "edge".into(),
            security_rules: vec![
                SecurityRule::new("ssh", Some("*"), Some("22")),
                SecurityRule::new("https", Some("*"), Some("443")),
            ],
        }];

        let Inventory::NetworkSecurityGroups(nsgs) =
            NsgEnumerator::new(Arc::new(api)).enumerate().unwrap()
        else {
            panic!("expected NSG inventory");
        };
        assert_eq!(nsgs.len(), 1);
        assert_eq!(nsgs[0].resource_group.as_deref(), Some("net"));
        assert_eq!(nsgs[0].properties.security_rules.len(), 2);
    }
}

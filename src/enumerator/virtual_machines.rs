use std::sync::Arc;

use tracing::{debug, warn};

use super::Enumerator;
use crate::azure::{ManagementApi, VmRecord};
use crate::error::Result;
use crate::resource::{
    Inventory, PublicIpBinding, ResourceDescriptor, Service, UnresolvedReference, VirtualMachine,
    VmProperties,
};

/// Lists VMs and follows VM → NIC → public IP for each of them.
///
/// A failed NIC or public IP lookup is recorded on that VM's
/// `unresolved` list; the VM keeps whatever bindings did resolve and the
/// other VMs are unaffected.
pub struct VmEnumerator {
    api: Arc<dyn ManagementApi>,
}

impl VmEnumerator {
    pub fn new(api: Arc<dyn ManagementApi>) -> Self {
        Self { api }
    }

    fn resolve(&self, vm: VmRecord) -> VirtualMachine {
        let mut public_ips = Vec::new();
        let mut unresolved = Vec::new();

        for nic_id in &vm.network_interface_ids {
            let nic = match self.api.get_network_interface(nic_id) {
                Ok(nic) => nic,
                Err(e) => {
                    warn!(vm = %vm.name, nic = %nic_id, error = %e, "NIC lookup failed");
                    unresolved.push(UnresolvedReference {
                        reference: nic_id.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            for pip_id in &nic.public_ip_ids {
                match self.api.get_public_ip_address(pip_id) {
                    Ok(pip) => public_ips.push(PublicIpBinding {
                        nic: nic.name.clone(),
                        public_ip: pip.ip_address,
                    }),
                    Err(e) => {
                        warn!(vm = %vm.name, public_ip = %pip_id, error = %e, "public IP lookup failed");
                        unresolved.push(UnresolvedReference {
                            reference: pip_id.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        ResourceDescriptor::new(
            vm.id,
            vm.name,
            VmProperties {
                network_interfaces: vm.network_interface_ids,
                public_ips,
                unresolved,
            },
        )
    }
}

impl Enumerator for VmEnumerator {
    fn service(&self) -> Service {
        Service::VirtualMachines
    }

    fn enumerate(&self) -> Result<Inventory> {
        self.api.ensure_configured()?;

        let records = self.api.list_virtual_machines()?;
        debug!(count = records.len(), "listed virtual machines");

        let vms = records.into_iter().map(|vm| self.resolve(vm)).collect();
        Ok(Inventory::VirtualMachines(vms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::fake::FakeApi;
    use crate::azure::{NicRecord, PublicIpRecord};
    use pretty_assertions::assert_eq;

    fn vm(name: &str, nics: &[&str]) -> VmRecord {
        VmRecord {
            id: format!("/subscriptions/s/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/{name}"),
            name: name.into(),
            network_interface_ids: nics.iter().map(|n| n.to_string()).collect(),
        }
    }

    fn nic(name: &str, pips: &[&str]) -> NicRecord {
        NicRecord {
            id: name.into(),
            name: name.into(),
            public_ip_ids: pips.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn pip(id: &str, address: Option<&str>) -> PublicIpRecord {
        PublicIpRecord {
            id: id.into(),
            name: id.into(),
            ip_address: address.map(str::to_string),
        }
    }

    fn enumerate(api: FakeApi) -> Vec<VirtualMachine> {
        match VmEnumerator::new(Arc::new(api)).enumerate().unwrap() {
            Inventory::VirtualMachines(vms) => vms,
            other => panic!("unexpected inventory {other:?}"),
        }
    }

    #[test]
    fn resolves_public_ips_through_nics() {
        let mut api = FakeApi::configured();
        api.vms = vec![vm("web", &["nic1", "nic2"]), vm("db", &["nic3"])];
        api.nics.insert("nic1".into(), nic("nic1", &["pip1"]));
        api.nics.insert("nic2".into(), nic("nic2", &[]));
        api.nics.insert("nic3".into(), nic("nic3", &[]));
        api.public_ips.insert("pip1".into(), pip("pip1", Some("1.2.3.4")));

        let vms = enumerate(api);
        assert_eq!(vms.len(), 2);
        assert_eq!(
            vms[0].properties.public_ips,
            vec![PublicIpBinding {
                nic: "nic1".into(),
                public_ip: Some("1.2.3.4".into())
            }]
        );
        assert!(vms[1].properties.public_ips.is_empty());
        assert!(vms[1].properties.unresolved.is_empty());
    }

    #[test]
    fn unallocated_public_ip_is_still_bound() {
        let mut api = FakeApi::configured();
        api.vms = vec![vm("web", &["nic1"])];
        api.nics.insert("nic1".into(), nic("nic1", &["pip1"]));
        api.public_ips.insert("pip1".into(), pip("pip1", None));

        let vms = enumerate(api);
        assert_eq!(vms[0].properties.public_ips.len(), 1);
        assert_eq!(vms[0].properties.public_ips[0].public_ip, None);
    }

    #[test]
    fn failed_lookups_do_not_abort_other_vms() {
        let mut api = FakeApi::configured();
        api.vms = vec![vm("broken", &["missing-nic", "nic1"]), vm("fine", &["nic2"])];
        api.nics.insert("nic1".into(), nic("nic1", &["missing-pip"]));
        api.nics.insert("nic2".into(), nic("nic2", &["pip2"]));
        api.public_ips.insert("pip2".into(), pip("pip2", Some("5.6.7.8")));

        let vms = enumerate(api);
        assert_eq!(vms.len(), 2);

        let refs: Vec<&str> = vms[0]
            .properties
            .unresolved
            .iter()
            .map(|u| u.reference.as_str())
            .collect();
        assert_eq!(refs, vec!["missing-nic", "missing-pip"]);
        assert!(vms[0].properties.public_ips.is_empty());

        assert_eq!(vms[1].properties.public_ips[0].public_ip.as_deref(), Some("5.6.7.8"));
    }
}

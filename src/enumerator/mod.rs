pub mod network;
pub mod storage;
pub mod virtual_machines;

use std::sync::Arc;

use crate::azure::ManagementApi;
use crate::error::Result;
use crate::resource::{Inventory, Service};

pub use network::NsgEnumerator;
pub use storage::StorageEnumerator;
pub use virtual_machines::VmEnumerator;

/// An enumerator lists every resource of one type and resolves the nested
/// references its rules need.
pub trait Enumerator: Send + Sync {
    /// The category this enumerator covers.
    fn service(&self) -> Service;

    /// Produce the inventory, or fail with `Access` / `Transient`.
    fn enumerate(&self) -> Result<Inventory>;
}

/// The three standard enumerators sharing one management client.
pub fn azure_enumerators(api: Arc<dyn ManagementApi>) -> Vec<Box<dyn Enumerator>> {
    vec![
        Box::new(StorageEnumerator::new(Arc::clone(&api))),
        Box::new(VmEnumerator::new(Arc::clone(&api))),
        Box::new(NsgEnumerator::new(api)),
    ]
}

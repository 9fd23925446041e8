mod open_nsg;
mod public_blob;
mod storage_encryption;
mod vm_public_ip;

pub use open_nsg::OpenNsgRule;
pub use public_blob::PublicBlobAccessRule;
pub use storage_encryption::StorageEncryptionRule;
pub use vm_public_ip::VmPublicIpRule;

use super::Rule;

/// Returns all built-in rules. Storage rules run in this order.
pub fn all_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(PublicBlobAccessRule),
        Box::new(StorageEncryptionRule),
        Box::new(VmPublicIpRule),
        Box::new(OpenNsgRule),
    ]
}

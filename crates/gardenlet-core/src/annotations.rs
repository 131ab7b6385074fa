//! Well-known annotation and label keys
//!
//! The operation annotation is the request side of an asynchronous command
//! protocol: the deployer sets it, the owning controller removes it once it
//! picked the request up and reports the outcome in `status.lastOperation`.

use crate::hash::sha256_hex;

/// Annotations shared by all Gardener-managed objects
pub mod gardener {
    /// Requested operation for the owning controller
    pub const OPERATION: &str = "gardener.cloud/operation";
    /// Time of the last operation request
    pub const TIMESTAMP: &str = "gardener.cloud/timestamp";
    /// Deletion must be confirmed before the object may be deleted
    pub const CONFIRMATION_DELETION: &str = "confirmation.gardener.cloud/deletion";
}

/// Values of the operation annotation
pub mod operation {
    pub const RECONCILE: &str = "reconcile";
    pub const MIGRATE: &str = "migrate";
    pub const RESTORE: &str = "restore";
    pub const WAIT_FOR_STATE: &str = "wait-for-state";
}

/// Annotations and labels understood by the resource manager
pub mod resources {
    /// Delete and recreate the object if an update is rejected as invalid
    pub const DELETE_ON_INVALID_UPDATE: &str = "resources.gardener.cloud/delete-on-invalid-update";
    /// Marks immutable objects that may be collected once unreferenced
    pub const GARBAGE_COLLECTABLE_REFERENCE: &str =
        "resources.gardener.cloud/garbage-collectable-reference";
    /// Prefix of reference annotations that keep referenced objects alive
    pub const REFERENCE_PREFIX: &str = "reference.resources.gardener.cloud/";
    /// Objects injected into a shoot that must survive a shoot cleanup
    pub const SHOOT_NO_CLEANUP: &str = "shoot.gardener.cloud/no-cleanup";
    /// Origin label of managed resources created by the gardenlet
    pub const ORIGIN: &str = "origin";
    pub const ORIGIN_GARDENER: &str = "gardener";
}

/// Common recommended labels
pub mod labels {
    pub const APP: &str = "app";
    pub const ROLE: &str = "role";
    pub const GARDEN_ROLE: &str = "gardener.cloud/role";
    pub const GARDEN_ROLE_SYSTEM_COMPONENT: &str = "system-component";
    pub const GARDEN_ROLE_MONITORING: &str = "monitoring";
}

/// Key of the annotation that references a ConfigMap or Secret by name
///
/// The name is hashed so that the key stays within the 63 character limit.
pub fn reference_annotation_key(kind: &str, name: &str) -> String {
    let hash = sha256_hex(name);
    format!(
        "{}{}-{}",
        resources::REFERENCE_PREFIX,
        kind.to_lowercase(),
        &hash[..8]
    )
}

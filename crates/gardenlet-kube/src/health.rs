//! Health predicates for polled objects
//!
//! Each check inspects one observed object and returns `Ok(())` when it has
//! converged. A failure is either transient ([`KubeError::NotReady`]) or an
//! error reported by the owning controller ([`KubeError::LastError`]); the
//! latter is retriable and escalates to severe after the severe threshold.
//!
//! Checks only read. They never modify the object they inspect.

use std::fmt;

use gardenlet_core::annotations::gardener;
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{KubeError, Result};
use crate::object::{annotation, key_of, status_of};

/// Status shared by all extension resources
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionStatus {
    /// Generation the controller last acted upon
    #[serde(default)]
    pub observed_generation: i64,

    /// Error of the last operation, cleared on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<LastError>,

    /// Outcome of the last operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_operation: Option<LastOperation>,

    /// Provider specific output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<Value>,

    /// Opaque state used to restore the resource after migration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
}

/// Error reported by an extension controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// Last operation performed by an extension controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastOperation {
    #[serde(rename = "type")]
    pub type_: LastOperationType,
    pub state: LastOperationState,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub progress: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastOperationType {
    Create,
    Reconcile,
    Delete,
    Migrate,
    Restore,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LastOperationState {
    Processing,
    Succeeded,
    Error,
    Failed,
    Pending,
    Aborted,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for LastOperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Status condition as reported by Gardener controllers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Find a condition by type
pub fn condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

fn display_key(object: &DynamicObject) -> String {
    key_of(object)
        .map(|k| k.to_string())
        .unwrap_or_else(|_| object.metadata.name.clone().unwrap_or_default())
}

fn not_ready(object: &DynamicObject, reason: impl Into<String>) -> KubeError {
    KubeError::NotReady {
        key: display_key(object),
        reason: reason.into(),
    }
}

/// Check an extension resource (Infrastructure, BackupEntry, ...)
///
/// Ready means: no last error, observed generation is current, no operation
/// annotation is pending, and the last operation succeeded.
pub fn check_extension_object(object: &DynamicObject) -> Result<()> {
    let status: ExtensionStatus = status_of(object)?.unwrap_or_default();

    if let Some(last_error) = status.last_error {
        return Err(KubeError::LastError {
            key: display_key(object),
            description: last_error.description,
            codes: last_error.codes,
        });
    }

    let generation = object.metadata.generation.unwrap_or(0);
    if status.observed_generation != generation {
        return Err(not_ready(
            object,
            format!(
                "observed generation outdated ({}/{})",
                status.observed_generation, generation
            ),
        ));
    }

    if let Some(op) = annotation(object, gardener::OPERATION) {
        return Err(not_ready(
            object,
            format!("gardener operation {:?} is not yet picked up by extension controller", op),
        ));
    }

    match status.last_operation {
        None => Err(not_ready(
            object,
            "extension did not record a last operation yet",
        )),
        Some(op) if op.state != LastOperationState::Succeeded => Err(not_ready(
            object,
            format!("extension state is not succeeded but {}", op.state),
        )),
        Some(_) => Ok(()),
    }
}

/// Status of a ManagedResource
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManagedResourceStatus {
    #[serde(default)]
    observed_generation: i64,
    #[serde(default)]
    conditions: Vec<Condition>,
}

/// Condition types a ManagedResource must report as `True`
pub const MANAGED_RESOURCE_CONDITIONS: [&str; 2] = ["ResourcesApplied", "ResourcesHealthy"];

/// Check a ManagedResource bundle
pub fn check_managed_resource(object: &DynamicObject) -> Result<()> {
    let status: ManagedResourceStatus = status_of(object)?.unwrap_or_default();

    let generation = object.metadata.generation.unwrap_or(0);
    if status.observed_generation < generation {
        return Err(not_ready(
            object,
            format!(
                "observed generation outdated ({}/{})",
                status.observed_generation, generation
            ),
        ));
    }

    for type_ in MANAGED_RESOURCE_CONDITIONS {
        match condition(&status.conditions, type_) {
            None => {
                return Err(not_ready(
                    object,
                    format!("condition {} has not been reported yet", type_),
                ));
            }
            Some(c) if c.status != "True" => {
                return Err(not_ready(
                    object,
                    format!(
                        "condition {} has invalid status {} (expected True) due to {}: {}",
                        type_,
                        c.status,
                        c.reason.as_deref().unwrap_or("Unknown"),
                        c.message.as_deref().unwrap_or("")
                    ),
                ));
            }
            Some(_) => {}
        }
    }

    Ok(())
}

/// Status of DNSEntry / DNSProvider / DNSOwner
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DnsStatus {
    #[serde(default)]
    observed_generation: i64,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Check a DNS object; `Error` and `Invalid` states are retriable errors
pub fn check_dns_object(object: &DynamicObject) -> Result<()> {
    let status: DnsStatus = status_of(object)?.unwrap_or_default();

    let generation = object.metadata.generation.unwrap_or(0);
    if status.observed_generation < generation {
        return Err(not_ready(
            object,
            format!(
                "observed generation outdated ({}/{})",
                status.observed_generation, generation
            ),
        ));
    }

    let state = status.state.as_deref().unwrap_or("");
    if state == "Ready" {
        return Ok(());
    }

    let description = match &status.message {
        Some(msg) => format!("state {}: {}", state, msg),
        None => format!("state {}", state),
    };

    if state == "Error" || state == "Invalid" {
        return Err(KubeError::LastError {
            key: display_key(object),
            description,
            codes: Vec::new(),
        });
    }
    Err(not_ready(object, description))
}

/// Status of an EtcdCopyBackupsTask
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EtcdCopyBackupsTaskStatus {
    #[serde(default)]
    observed_generation: Option<i64>,
    #[serde(default)]
    conditions: Vec<Condition>,
}

/// Check an EtcdCopyBackupsTask for completion
pub fn check_etcd_copy_backups_task(object: &DynamicObject) -> Result<()> {
    let status: EtcdCopyBackupsTaskStatus = status_of(object)?.unwrap_or_default();

    let generation = object.metadata.generation.unwrap_or(0);
    if status.observed_generation != Some(generation) {
        return Err(not_ready(
            object,
            format!(
                "observed generation outdated ({}/{})",
                status.observed_generation.unwrap_or(0),
                generation
            ),
        ));
    }

    if let Some(failed) = condition(&status.conditions, "Failed").filter(|c| c.status == "True") {
        return Err(KubeError::LastError {
            key: display_key(object),
            description: format!(
                "{}: {}",
                failed.reason.as_deref().unwrap_or("Failed"),
                failed.message.as_deref().unwrap_or("")
            ),
            codes: Vec::new(),
        });
    }

    match condition(&status.conditions, "Succeeded") {
        Some(c) if c.status == "True" => Ok(()),
        _ => Err(not_ready(object, "task has not succeeded yet")),
    }
}

/// Any existing object is healthy
pub fn check_exists(_object: &DynamicObject) -> Result<()> {
    Ok(())
}

//! Lifecycle of extension resources
//!
//! Extension resources (Infrastructure, BackupEntry, ...) are reconciled by
//! provider specific controllers. The deployer drives them through
//!
//! ```text
//! Absent ──► Creating ──► Reconciling ──► Ready
//!                                          │
//!            Restoring ◄── Migrated ◄── Migrating
//!                │
//!                └──────────► Ready
//! ```
//!
//! by writing the operation annotation and then polling the status the
//! controller reports. Apart from that annotation (and the state pushed
//! during restore) nothing here writes to the polled object.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use gardenlet_core::annotations::{gardener, operation};
use gardenlet_core::{ObjectKey, ShootState, WaitTimings};
use kube::api::DynamicObject;
use serde_json::Value;
use tracing::{debug, info};

use crate::client::ObjectClient;
use crate::error::{KubeError, Result};
use crate::health::{ExtensionStatus, LastOperationState, LastOperationType, check_extension_object};
use crate::object::{annotation, status_of};
use crate::retry::{
    self, Poll, minor_or_severe, severe_threshold_attempts, until_timeout, wrap_wait_error,
};

/// Source of the current time, replaceable in tests
pub type Clock = fn() -> DateTime<Utc>;

/// Format used for the timestamp annotation
pub fn timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Lifecycle phase of an extension resource as derived from its observed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionPhase {
    /// Object does not exist
    Absent,
    /// Object exists, controller has not reported anything yet
    Creating,
    /// Controller is working on the current generation
    Reconciling,
    /// Current generation reconciled successfully
    Ready,
    /// Controller reported an error
    Failed,
    /// Migration requested or in progress
    Migrating,
    /// Migration finished, object may be removed from this seed
    Migrated,
    /// Waiting for or applying restored state
    Restoring,
    /// Deletion in progress
    Deleting,
}

impl ExtensionPhase {
    /// Derive the phase from an observed object
    pub fn observe(object: Option<&DynamicObject>) -> Self {
        let Some(object) = object else {
            return Self::Absent;
        };

        if object.metadata.deletion_timestamp.is_some() {
            return Self::Deleting;
        }

        match annotation(object, gardener::OPERATION) {
            Some(operation::MIGRATE) => return Self::Migrating,
            Some(operation::RESTORE) | Some(operation::WAIT_FOR_STATE) => return Self::Restoring,
            _ => {}
        }

        let status: ExtensionStatus = status_of(object).ok().flatten().unwrap_or_default();
        let Some(last_operation) = status.last_operation else {
            return Self::Creating;
        };

        let current = status.observed_generation == object.metadata.generation.unwrap_or(0);
        match (last_operation.type_, last_operation.state) {
            (LastOperationType::Migrate, LastOperationState::Succeeded) => Self::Migrated,
            (LastOperationType::Migrate, _) => Self::Migrating,
            (LastOperationType::Restore, LastOperationState::Processing) => Self::Restoring,
            _ if status.last_error.is_some() => Self::Failed,
            (_, LastOperationState::Error | LastOperationState::Failed | LastOperationState::Aborted) => {
                Self::Failed
            }
            (_, LastOperationState::Succeeded) if current => Self::Ready,
            _ => Self::Reconciling,
        }
    }

    /// Whether the controller is done with the object for now
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Absent | Self::Ready | Self::Failed | Self::Migrated
        )
    }
}

/// Whether the controller reported that its last operation did not succeed
///
/// Such an object needs a fresh operation request, otherwise the controller
/// will not retry. Objects without a last operation are still being picked up.
pub fn last_operation_not_successful(object: &DynamicObject) -> bool {
    status_of::<ExtensionStatus>(object)
        .ok()
        .flatten()
        .and_then(|status| status.last_operation)
        .is_some_and(|op| op.state != LastOperationState::Succeeded)
}

/// Request an operation from the owning controller
pub async fn annotate_object_with_operation<C>(
    client: &C,
    key: &ObjectKey,
    op: &str,
    now: DateTime<Utc>,
) -> Result<()>
where
    C: ObjectClient + ?Sized,
{
    let annotations = BTreeMap::from([
        (gardener::OPERATION.to_string(), op.to_string()),
        (gardener::TIMESTAMP.to_string(), timestamp(now)),
    ]);
    client.patch_annotations(key, &annotations).await?;
    debug!(object = %key, operation = op, "Requested operation");
    Ok(())
}

/// Mark an object so that its deletion is accepted by admission
///
/// A missing object needs no confirmation.
pub async fn confirm_deletion<C>(client: &C, key: &ObjectKey, now: DateTime<Utc>) -> Result<()>
where
    C: ObjectClient + ?Sized,
{
    let annotations = BTreeMap::from([
        (gardener::CONFIRMATION_DELETION.to_string(), "true".to_string()),
        (gardener::TIMESTAMP.to_string(), timestamp(now)),
    ]);
    match client.patch_annotations(key, &annotations).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Confirm deletion and delete; a missing object counts as deleted
pub async fn delete_extension_object<C>(
    client: &C,
    key: &ObjectKey,
    now: DateTime<Utc>,
) -> Result<()>
where
    C: ObjectClient + ?Sized,
{
    confirm_deletion(client, key, now).await?;
    let result = client.delete(key).await?;
    if result.deleted {
        info!(object = %key, "Deleted extension object");
    }
    Ok(())
}

/// Request migration; a missing object has nothing to migrate
pub async fn migrate_extension_object<C>(
    client: &C,
    key: &ObjectKey,
    now: DateTime<Utc>,
) -> Result<()>
where
    C: ObjectClient + ?Sized,
{
    match annotate_object_with_operation(client, key, operation::MIGRATE, now).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

/// Wait until the controller reconciled the current generation successfully
pub async fn wait_until_extension_object_ready<C>(
    client: &C,
    key: &ObjectKey,
    timings: &WaitTimings,
) -> Result<DynamicObject>
where
    C: ObjectClient + ?Sized,
{
    retry::wait_until_object_ready(client, key, timings, check_extension_object).await
}

/// Wait until the object is gone
pub async fn wait_until_extension_object_deleted<C>(
    client: &C,
    key: &ObjectKey,
    timings: &WaitTimings,
) -> Result<()>
where
    C: ObjectClient + ?Sized,
{
    retry::wait_until_object_deleted(client, key, timings).await
}

/// Wait until the controller reports a successful migration
///
/// A missing object counts as migrated.
pub async fn wait_until_extension_object_migrated<C>(
    client: &C,
    key: &ObjectKey,
    timings: &WaitTimings,
) -> Result<()>
where
    C: ObjectClient + ?Sized,
{
    let operation = format!("error while waiting for {} to be migrated", key);
    let threshold = severe_threshold_attempts(timings.interval, timings.severe_threshold);

    until_timeout(&operation, timings.interval, timings.timeout, |attempt| async move {
        let object = match client.get(key).await {
            Ok(Some(object)) => object,
            Ok(None) => return Poll::Ready(()),
            Err(e) => return Poll::Severe(e),
        };

        let status: ExtensionStatus = match status_of(&object) {
            Ok(status) => status.unwrap_or_default(),
            Err(e) => return Poll::Severe(e),
        };

        if let Some(last_error) = status.last_error {
            return minor_or_severe(
                attempt,
                threshold,
                KubeError::LastError {
                    key: key.to_string(),
                    description: last_error.description,
                    codes: last_error.codes,
                },
            );
        }

        match status.last_operation {
            Some(op)
                if op.type_ == LastOperationType::Migrate
                    && op.state == LastOperationState::Succeeded =>
            {
                Poll::Ready(())
            }
            _ => Poll::Minor(KubeError::NotReady {
                key: key.to_string(),
                reason: "migration has not finished yet".to_string(),
            }),
        }
    })
    .await
    .map_err(|e| wrap_wait_error(&operation, e))
}

/// Push captured state into the status subresource, then request `restore`
///
/// The state is looked up in the shoot state by kind, name and purpose. If no
/// state was captured the restore is still requested so the controller can
/// start from scratch.
pub async fn restore_extension_object_state<C>(
    client: &C,
    key: &ObjectKey,
    shoot_state: &ShootState,
    purpose: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()>
where
    C: ObjectClient + ?Sized,
{
    if let Some(captured) = shoot_state.extension(&key.kind, Some(&key.name), purpose) {
        // null in a merge patch deletes the field
        let mut status = serde_json::Map::new();
        if let Some(state) = &captured.state {
            status.insert("state".to_string(), state.clone());
        }
        if !captured.resources.is_empty() {
            status.insert(
                "resources".to_string(),
                serde_json::to_value(&captured.resources)?,
            );
        }
        if !status.is_empty() {
            client.patch_status(key, &Value::Object(status)).await?;
            info!(object = %key, "Restored extension state");
        }
    }

    annotate_object_with_operation(client, key, operation::RESTORE, now).await
}

/// Deploy with `wait-for-state`, then restore the captured state
///
/// The deploy future must create the object annotated with
/// `gardener.cloud/operation=wait-for-state` so the controller does not start
/// reconciling before the state is in place.
pub async fn restore_extension_with_deploy<C, F>(
    client: &C,
    key: &ObjectKey,
    shoot_state: &ShootState,
    purpose: Option<&str>,
    now: DateTime<Utc>,
    deploy: F,
) -> Result<()>
where
    C: ObjectClient + ?Sized,
    F: std::future::Future<Output = Result<()>>,
{
    deploy.await?;
    restore_extension_object_state(client, key, shoot_state, purpose, now).await
}

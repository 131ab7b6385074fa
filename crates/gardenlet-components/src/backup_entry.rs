//! BackupEntry extension resource
//!
//! Cluster-scoped; one entry per shoot points at the backup bucket that
//! stores its etcd snapshots. Every deploy requests a reconciliation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gardenlet_core::annotations::{gardener, operation};
use gardenlet_core::{ObjectKey, ShootState, WaitTimings};
use gardenlet_kube::extension::{self, Clock, timestamp};
use gardenlet_kube::object::{new_dynamic_object, object_meta, set_annotation};
use gardenlet_kube::{Deployer, MigrateWaiter, Migrator, ObjectClient, Result, Waiter};
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

/// Component name used for configuration lookups
pub const NAME: &str = "backup-entry";

pub const API_VERSION: &str = "extensions.gardener.cloud/v1alpha1";
pub const KIND: &str = "BackupEntry";

pub const DEFAULT_TIMINGS: WaitTimings = WaitTimings::new(
    Duration::from_secs(5),
    Duration::from_secs(30),
    Duration::from_secs(600),
);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEntrySpec {
    #[serde(rename = "type")]
    pub type_: String,
    pub region: String,
    pub bucket_name: String,
    pub secret_ref: SecretReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    pub name: String,
    pub spec: BackupEntrySpec,
}

pub struct BackupEntry {
    client: Arc<dyn ObjectClient>,
    values: Values,
    timings: WaitTimings,
    clock: Clock,
}

impl BackupEntry {
    pub fn new(client: Arc<dyn ObjectClient>, values: Values) -> Self {
        Self {
            client,
            values,
            timings: DEFAULT_TIMINGS,
            clock: Utc::now,
        }
    }

    pub fn with_timings(mut self, timings: WaitTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::cluster(API_VERSION, KIND, &self.values.name)
    }

    pub fn object(&self, op: &str) -> Result<DynamicObject> {
        let mut metadata = object_meta(&self.key());
        set_annotation(&mut metadata, gardener::OPERATION, op);
        set_annotation(&mut metadata, gardener::TIMESTAMP, timestamp((self.clock)()));

        Ok(new_dynamic_object(
            API_VERSION,
            KIND,
            metadata,
            json!({ "spec": serde_json::to_value(&self.values.spec)? }),
        ))
    }

    async fn deploy_with_operation(&self, op: &str) -> Result<()> {
        let result = self.client.apply(&self.object(op)?).await?;
        info!(object = %result.key, created = result.created, bucket = %self.values.spec.bucket_name, "Deployed backup entry");
        Ok(())
    }
}

#[async_trait]
impl Deployer for BackupEntry {
    async fn deploy(&self) -> Result<()> {
        self.deploy_with_operation(operation::RECONCILE).await
    }

    async fn destroy(&self) -> Result<()> {
        extension::delete_extension_object(&*self.client, &self.key(), (self.clock)()).await
    }
}

#[async_trait]
impl Waiter for BackupEntry {
    async fn wait(&self) -> Result<()> {
        extension::wait_until_extension_object_ready(&*self.client, &self.key(), &self.timings)
            .await?;
        Ok(())
    }

    async fn wait_cleanup(&self) -> Result<()> {
        extension::wait_until_extension_object_deleted(&*self.client, &self.key(), &self.timings)
            .await
    }
}

#[async_trait]
impl Migrator for BackupEntry {
    async fn migrate(&self) -> Result<()> {
        extension::migrate_extension_object(&*self.client, &self.key(), (self.clock)()).await
    }

    async fn restore(&self, shoot_state: &ShootState) -> Result<()> {
        extension::restore_extension_with_deploy(
            &*self.client,
            &self.key(),
            shoot_state,
            None,
            (self.clock)(),
            self.deploy_with_operation(operation::WAIT_FOR_STATE),
        )
        .await
    }
}

#[async_trait]
impl MigrateWaiter for BackupEntry {
    async fn wait_migrate(&self) -> Result<()> {
        extension::wait_until_extension_object_migrated(&*self.client, &self.key(), &self.timings)
            .await
    }
}

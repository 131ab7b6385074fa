//! EtcdCopyBackupsTask
//!
//! Copies etcd backups from the source to the target store during control
//! plane migration. The task is executed by etcd-druid, which reports the
//! outcome via the `Succeeded` and `Failed` conditions.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gardenlet_core::{ObjectKey, WaitTimings};
use gardenlet_kube::health::check_etcd_copy_backups_task;
use gardenlet_kube::object::{new_dynamic_object, object_meta};
use gardenlet_kube::{Deployer, ObjectClient, Result, Waiter, retry};
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

/// Component name used for configuration lookups
pub const NAME: &str = "etcd-copy-backups-task";

pub const API_VERSION: &str = "druid.gardener.cloud/v1alpha1";
pub const KIND: &str = "EtcdCopyBackupsTask";

pub const DEFAULT_TIMINGS: WaitTimings = WaitTimings::new(
    Duration::from_secs(5),
    Duration::from_secs(60),
    Duration::from_secs(900),
);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Location of a backup store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitForFinalSnapshotSpec {
    pub enabled: bool,
    /// Kubernetes duration, e.g. `10m`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtcdCopyBackupsTaskSpec {
    pub source_store: StoreSpec,
    pub target_store: StoreSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backup_age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backups: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for_final_snapshot: Option<WaitForFinalSnapshotSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Values {
    pub namespace: String,
    pub name: String,
    pub spec: EtcdCopyBackupsTaskSpec,
}

pub struct EtcdCopyBackupsTask {
    client: Arc<dyn ObjectClient>,
    values: Values,
    timings: WaitTimings,
}

impl EtcdCopyBackupsTask {
    pub fn new(client: Arc<dyn ObjectClient>, values: Values) -> Self {
        Self {
            client,
            values,
            timings: DEFAULT_TIMINGS,
        }
    }

    pub fn with_timings(mut self, timings: WaitTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::namespaced(API_VERSION, KIND, &self.values.namespace, &self.values.name)
    }

    pub fn object(&self) -> Result<DynamicObject> {
        Ok(new_dynamic_object(
            API_VERSION,
            KIND,
            object_meta(&self.key()),
            json!({ "spec": serde_json::to_value(&self.values.spec)? }),
        ))
    }
}

#[async_trait]
impl Deployer for EtcdCopyBackupsTask {
    async fn deploy(&self) -> Result<()> {
        let result = self.client.apply(&self.object()?).await?;
        info!(object = %result.key, created = result.created, "Deployed etcd copy backups task");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.client.delete(&self.key()).await?;
        Ok(())
    }
}

#[async_trait]
impl Waiter for EtcdCopyBackupsTask {
    async fn wait(&self) -> Result<()> {
        retry::wait_until_object_ready(
            &*self.client,
            &self.key(),
            &self.timings,
            check_etcd_copy_backups_task,
        )
        .await?;
        Ok(())
    }

    async fn wait_cleanup(&self) -> Result<()> {
        retry::wait_until_object_deleted(&*self.client, &self.key(), &self.timings).await
    }
}

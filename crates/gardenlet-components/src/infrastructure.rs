//! Infrastructure extension resource
//!
//! The provider extension creates networks, subnets and the like for the
//! shoot and publishes the results in `status.providerStatus` and
//! `status.nodesCIDR`. Both are cached after a successful [`Waiter::wait`].

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use gardenlet_core::annotations::{gardener, operation};
use gardenlet_core::{ObjectKey, ShootState, WaitTimings};
use gardenlet_kube::extension::{self, Clock, timestamp};
use gardenlet_kube::object::{new_dynamic_object, object_meta, set_annotation, status_of};
use gardenlet_kube::{
    Deployer, MigrateWaiter, Migrator, ObjectClient, Result, Waiter,
};
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

/// Component name used for configuration lookups
pub const NAME: &str = "infrastructure";

pub const API_VERSION: &str = "extensions.gardener.cloud/v1alpha1";
pub const KIND: &str = "Infrastructure";

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
pub struct InfrastructureSpec {
    #[serde(rename = "type")]
    pub type_: String,
    pub region: String,
    pub secret_ref: SecretReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config: Option<Value>,
}

/// Outputs of the provider extension
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InfrastructureStatus {
    #[serde(default)]
    provider_status: Option<Value>,
    #[serde(default, rename = "nodesCIDR")]
    nodes_cidr: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    pub namespace: String,
    pub name: String,
    pub type_: String,
    pub region: String,
    pub provider_config: Option<Value>,
    /// Request a reconciliation even if the object already exists
    pub annotate_operation: bool,
}

pub struct Infrastructure {
    client: Arc<dyn ObjectClient>,
    values: Values,
    timings: WaitTimings,
    clock: Clock,
    provider_status: Mutex<Option<Value>>,
    nodes_cidr: Mutex<Option<String>>,
}

impl Infrastructure {
    pub fn new(client: Arc<dyn ObjectClient>, values: Values) -> Self {
        Self {
            client,
            values,
            timings: DEFAULT_TIMINGS,
            clock: Utc::now,
            provider_status: Mutex::new(None),
            nodes_cidr: Mutex::new(None),
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
        ObjectKey::namespaced(API_VERSION, KIND, &self.values.namespace, &self.values.name)
    }

    /// Provider status observed by the last successful wait
    pub fn provider_status(&self) -> Option<Value> {
        self.provider_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Node network observed by the last successful wait
    pub fn nodes_cidr(&self) -> Option<String> {
        self.nodes_cidr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn object(&self) -> Result<DynamicObject> {
        let spec = InfrastructureSpec {
            type_: self.values.type_.clone(),
            region: self.values.region.clone(),
            secret_ref: SecretReference {
                name: "cloudprovider".to_string(),
                namespace: self.values.namespace.clone(),
            },
            provider_config: self.values.provider_config.clone(),
        };
        Ok(new_dynamic_object(
            API_VERSION,
            KIND,
            object_meta(&self.key()),
            json!({ "spec": serde_json::to_value(&spec)? }),
        ))
    }

    /// Apply the object, requesting `op` when needed
    ///
    /// `reconcile` is only requested for new objects, objects whose last
    /// operation did not succeed, or when `annotate_operation` is set. Any
    /// other operation is always requested.
    async fn deploy_with_operation(&self, op: &str) -> Result<()> {
        let key = self.key();
        let mut object = self.object()?;

        let request = if op != operation::RECONCILE || self.values.annotate_operation {
            true
        } else {
            match self.client.get(&key).await? {
                Some(existing) => extension::last_operation_not_successful(&existing),
                None => true,
            }
        };
        if request {
            set_annotation(&mut object.metadata, gardener::OPERATION, op);
            set_annotation(&mut object.metadata, gardener::TIMESTAMP, timestamp((self.clock)()));
        }

        let result = self.client.apply(&object).await?;
        info!(object = %key, created = result.created, requested = ?request.then_some(op), "Deployed infrastructure");
        Ok(())
    }
}

#[async_trait]
impl Deployer for Infrastructure {
    async fn deploy(&self) -> Result<()> {
        self.deploy_with_operation(operation::RECONCILE).await
    }

    async fn destroy(&self) -> Result<()> {
        extension::delete_extension_object(&*self.client, &self.key(), (self.clock)()).await
    }
}

#[async_trait]
impl Waiter for Infrastructure {
    async fn wait(&self) -> Result<()> {
        let object =
            extension::wait_until_extension_object_ready(&*self.client, &self.key(), &self.timings)
                .await?;

        let status: InfrastructureStatus = status_of(&object)?.unwrap_or_default();
        *self
            .provider_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = status.provider_status;
        *self.nodes_cidr.lock().unwrap_or_else(PoisonError::into_inner) = status.nodes_cidr;
        Ok(())
    }

    async fn wait_cleanup(&self) -> Result<()> {
        extension::wait_until_extension_object_deleted(&*self.client, &self.key(), &self.timings)
            .await
    }
}

#[async_trait]
impl Migrator for Infrastructure {
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
impl MigrateWaiter for Infrastructure {
    async fn wait_migrate(&self) -> Result<()> {
        extension::wait_until_extension_object_migrated(&*self.client, &self.key(), &self.timings)
            .await
    }
}

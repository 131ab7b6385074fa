use std::sync::Arc;

use async_trait::async_trait;
use gardenlet_core::{ObjectKey, WaitTimings};
use gardenlet_kube::health::check_exists;
use gardenlet_kube::object::new_dynamic_object;
use gardenlet_kube::{Deployer, ObjectClient, Result, Waiter, retry};
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{API_VERSION, DEFAULT_TIMINGS, metadata};

const KIND: &str = "DNSOwner";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsOwnerSpec {
    pub owner_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnerValues {
    pub name: String,
    pub class: Option<String>,
    pub spec: DnsOwnerSpec,
}

/// Cluster-scoped owner identity; entries of inactive owners are ignored
pub struct DnsOwner {
    client: Arc<dyn ObjectClient>,
    values: OwnerValues,
    timings: WaitTimings,
}

impl DnsOwner {
    pub fn new(client: Arc<dyn ObjectClient>, values: OwnerValues) -> Self {
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
        ObjectKey::cluster(API_VERSION, KIND, &self.values.name)
    }

    pub fn object(&self) -> Result<DynamicObject> {
        Ok(new_dynamic_object(
            API_VERSION,
            KIND,
            metadata(None, &self.values.name, self.values.class.as_deref()),
            json!({ "spec": serde_json::to_value(&self.values.spec)? }),
        ))
    }
}

#[async_trait]
impl Deployer for DnsOwner {
    async fn deploy(&self) -> Result<()> {
        let result = self.client.apply(&self.object()?).await?;
        info!(object = %result.key, owner_id = %self.values.spec.owner_id, "Deployed DNS owner");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.client.delete(&self.key()).await?;
        Ok(())
    }
}

#[async_trait]
impl Waiter for DnsOwner {
    async fn wait(&self) -> Result<()> {
        retry::wait_until_object_ready(&*self.client, &self.key(), &self.timings, check_exists)
            .await?;
        Ok(())
    }

    async fn wait_cleanup(&self) -> Result<()> {
        retry::wait_until_object_deleted(&*self.client, &self.key(), &self.timings).await
    }
}

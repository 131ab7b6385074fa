use std::sync::Arc;

use async_trait::async_trait;
use gardenlet_core::{ObjectKey, WaitTimings};
use gardenlet_kube::health::check_dns_object;
use gardenlet_kube::object::new_dynamic_object;
use gardenlet_kube::{Deployer, ObjectClient, Result, Waiter, retry};
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{API_VERSION, DEFAULT_TIMINGS, metadata};

const KIND: &str = "DNSEntry";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsEntrySpec {
    pub dns_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryValues {
    pub name: String,
    pub class: Option<String>,
    pub spec: DnsEntrySpec,
}

/// A DNS record managed by the dns-controller-manager
pub struct DnsEntry {
    client: Arc<dyn ObjectClient>,
    namespace: String,
    values: EntryValues,
    timings: WaitTimings,
}

impl DnsEntry {
    pub fn new(client: Arc<dyn ObjectClient>, namespace: impl Into<String>, values: EntryValues) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            values,
            timings: DEFAULT_TIMINGS,
        }
    }

    pub fn with_timings(mut self, timings: WaitTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::namespaced(API_VERSION, KIND, &self.namespace, &self.values.name)
    }

    pub fn object(&self) -> Result<DynamicObject> {
        Ok(new_dynamic_object(
            API_VERSION,
            KIND,
            metadata(
                Some(&self.namespace),
                &self.values.name,
                self.values.class.as_deref(),
            ),
            json!({ "spec": serde_json::to_value(&self.values.spec)? }),
        ))
    }
}

#[async_trait]
impl Deployer for DnsEntry {
    async fn deploy(&self) -> Result<()> {
        let result = self.client.apply(&self.object()?).await?;
        info!(object = %result.key, dns_name = %self.values.spec.dns_name, "Deployed DNS entry");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.client.delete(&self.key()).await?;
        Ok(())
    }
}

#[async_trait]
impl Waiter for DnsEntry {
    async fn wait(&self) -> Result<()> {
        retry::wait_until_object_ready(&*self.client, &self.key(), &self.timings, check_dns_object)
            .await?;
        Ok(())
    }

    async fn wait_cleanup(&self) -> Result<()> {
        retry::wait_until_object_deleted(&*self.client, &self.key(), &self.timings).await
    }
}

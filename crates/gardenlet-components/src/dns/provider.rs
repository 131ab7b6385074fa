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

const KIND: &str = "DNSProvider";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Domains or hosted zones a provider may (not) serve
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsSelection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsProviderSpec {
    #[serde(rename = "type")]
    pub type_: String,
    pub secret_ref: SecretReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains: Option<DnsSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<DnsSelection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderValues {
    pub name: String,
    pub class: Option<String>,
    pub spec: DnsProviderSpec,
}

/// Credentials and scope for one DNS backend
pub struct DnsProvider {
    client: Arc<dyn ObjectClient>,
    namespace: String,
    values: ProviderValues,
    timings: WaitTimings,
}

impl DnsProvider {
    pub fn new(
        client: Arc<dyn ObjectClient>,
        namespace: impl Into<String>,
        values: ProviderValues,
    ) -> Self {
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
impl Deployer for DnsProvider {
    async fn deploy(&self) -> Result<()> {
        let result = self.client.apply(&self.object()?).await?;
        info!(object = %result.key, provider_type = %self.values.spec.type_, "Deployed DNS provider");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.client.delete(&self.key()).await?;
        Ok(())
    }
}

#[async_trait]
impl Waiter for DnsProvider {
    async fn wait(&self) -> Result<()> {
        retry::wait_until_object_ready(&*self.client, &self.key(), &self.timings, check_dns_object)
            .await?;
        Ok(())
    }

    async fn wait_cleanup(&self) -> Result<()> {
        retry::wait_until_object_deleted(&*self.client, &self.key(), &self.timings).await
    }
}

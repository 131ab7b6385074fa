//! Managed resource bundles
//!
//! A bundle is a Secret holding serialised manifests plus a `ManagedResource`
//! object pointing at it. The resource manager reconciles the bundle into the
//! target cluster (seed or shoot) and reports the outcome through the
//! `ResourcesApplied` and `ResourcesHealthy` conditions.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use gardenlet_core::annotations::resources;
use gardenlet_core::{ObjectKey, Registry, WaitTimings};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::ObjectClient;
use crate::error::{KubeError, Result};
use crate::health::check_managed_resource;
use crate::object::{new_dynamic_object, to_dynamic_object};
use crate::retry;

pub const API_VERSION: &str = "resources.gardener.cloud/v1alpha1";
pub const KIND: &str = "ManagedResource";

/// Class handled by the seed's resource manager
pub const CLASS_SEED: &str = "seed";

const SECRET_PREFIX: &str = "managedresource-";

/// Name of the Secret that carries the manifests of a bundle
pub fn secret_name(name: &str) -> String {
    format!("{}{}", SECRET_PREFIX, name)
}

/// Key of a ManagedResource object
pub fn managed_resource_key(namespace: &str, name: &str) -> ObjectKey {
    ObjectKey::namespaced(API_VERSION, KIND, namespace, name)
}

/// Key of the Secret of a bundle
pub fn secret_key(namespace: &str, name: &str) -> ObjectKey {
    ObjectKey::namespaced("v1", "Secret", namespace, secret_name(name))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReference {
    pub name: String,
}

/// Spec of a ManagedResource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedResourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default)]
    pub secret_refs: Vec<SecretReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_objects: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inject_labels: BTreeMap<String, String>,
}

/// Desired state of a ManagedResource object
#[derive(Debug, Clone)]
pub struct ManagedResource {
    namespace: String,
    name: String,
    labels: BTreeMap<String, String>,
    spec: ManagedResourceSpec,
}

impl ManagedResource {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            labels: BTreeMap::new(),
            spec: ManagedResourceSpec::default(),
        }
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.spec.class = Some(class.into());
        self
    }

    /// Leave the objects in place when the ManagedResource is deleted
    pub fn keep_objects(mut self, keep: bool) -> Self {
        self.spec.keep_objects = Some(keep);
        self
    }

    /// Labels the resource manager injects into every object of the bundle
    pub fn inject_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.spec.inject_labels.extend(labels);
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_secret_ref(mut self, name: impl Into<String>) -> Self {
        self.spec.secret_refs.push(SecretReference { name: name.into() });
        self
    }

    pub fn key(&self) -> ObjectKey {
        managed_resource_key(&self.namespace, &self.name)
    }

    pub fn spec(&self) -> &ManagedResourceSpec {
        &self.spec
    }

    pub fn to_object(&self) -> Result<DynamicObject> {
        let metadata = ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: (!self.labels.is_empty()).then(|| self.labels.clone()),
            ..Default::default()
        };
        Ok(new_dynamic_object(
            API_VERSION,
            KIND,
            metadata,
            serde_json::json!({ "spec": serde_json::to_value(&self.spec)? }),
        ))
    }

    /// Create or update the ManagedResource object
    pub async fn reconcile<C>(&self, client: &C) -> Result<()>
    where
        C: ObjectClient + ?Sized,
    {
        let result = client.apply(&self.to_object()?).await?;
        debug!(object = %result.key, created = result.created, "Reconciled managed resource");
        Ok(())
    }
}

/// Secret carrying the serialised objects of a registry
pub fn bundle_secret(namespace: &str, name: &str, registry: &Registry) -> Result<DynamicObject> {
    let data = registry
        .serialized_objects()
        .into_iter()
        .map(|(filename, yaml)| (filename, ByteString(yaml.into_bytes())))
        .collect();

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name(name)),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(data),
        ..Default::default()
    };
    to_dynamic_object(&secret)
}

/// Read the manifests back out of a bundle secret
pub fn decode_bundle(secret: &DynamicObject) -> Result<BTreeMap<String, String>> {
    let Some(data) = secret.data.get("data").and_then(|d| d.as_object()) else {
        return Ok(BTreeMap::new());
    };

    data.iter()
        .map(|(filename, encoded)| {
            let encoded = encoded.as_str().ok_or_else(|| {
                KubeError::Serialization(format!("secret entry {} is not a string", filename))
            })?;
            let decoded = STANDARD
                .decode(encoded)
                .map_err(|e| KubeError::Serialization(format!("base64 decode error: {}", e)))?;
            let yaml = String::from_utf8(decoded)
                .map_err(|e| KubeError::Serialization(format!("invalid UTF-8 in {}: {}", filename, e)))?;
            Ok((filename.clone(), yaml))
        })
        .collect()
}

/// Apply the bundle secret and a ManagedResource referencing it
pub async fn create<C>(
    client: &C,
    registry: &Registry,
    managed_resource: ManagedResource,
) -> Result<()>
where
    C: ObjectClient + ?Sized,
{
    let namespace = managed_resource.namespace.clone();
    let name = managed_resource.name.clone();

    client
        .apply(&bundle_secret(&namespace, &name, registry)?)
        .await?;
    managed_resource
        .with_secret_ref(secret_name(&name))
        .reconcile(client)
        .await?;

    info!(namespace = %namespace, name = %name, objects = registry.len(), "Deployed managed resource");
    Ok(())
}

/// Bundle reconciled into the seed cluster
pub async fn create_for_seed<C>(
    client: &C,
    namespace: &str,
    name: &str,
    keep_objects: bool,
    registry: &Registry,
) -> Result<()>
where
    C: ObjectClient + ?Sized,
{
    let managed_resource = ManagedResource::new(namespace, name)
        .with_class(CLASS_SEED)
        .keep_objects(keep_objects);
    create(client, registry, managed_resource).await
}

/// Bundle reconciled into the shoot cluster
///
/// Objects are labelled so that a shoot cleanup leaves them alone.
pub async fn create_for_shoot<C>(
    client: &C,
    namespace: &str,
    name: &str,
    keep_objects: bool,
    registry: &Registry,
) -> Result<()>
where
    C: ObjectClient + ?Sized,
{
    let managed_resource = ManagedResource::new(namespace, name)
        .with_label(resources::ORIGIN, resources::ORIGIN_GARDENER)
        .keep_objects(keep_objects)
        .inject_labels(BTreeMap::from([(
            resources::SHOOT_NO_CLEANUP.to_string(),
            "true".to_string(),
        )]));
    create(client, registry, managed_resource).await
}

/// Delete the ManagedResource and its secret; missing objects are fine
pub async fn delete<C>(client: &C, namespace: &str, name: &str) -> Result<()>
where
    C: ObjectClient + ?Sized,
{
    client.delete(&managed_resource_key(namespace, name)).await?;
    client.delete(&secret_key(namespace, name)).await?;
    info!(namespace = %namespace, name = %name, "Deleted managed resource");
    Ok(())
}

/// Wait until the resource manager applied the bundle and found it healthy
pub async fn wait_until_healthy<C>(
    client: &C,
    namespace: &str,
    name: &str,
    timings: &WaitTimings,
) -> Result<()>
where
    C: ObjectClient + ?Sized,
{
    let key = managed_resource_key(namespace, name);
    retry::wait_until_object_ready(client, &key, timings, check_managed_resource).await?;
    Ok(())
}

/// Wait until the ManagedResource is gone
pub async fn wait_until_deleted<C>(
    client: &C,
    namespace: &str,
    name: &str,
    timings: &WaitTimings,
) -> Result<()>
where
    C: ObjectClient + ?Sized,
{
    let key = managed_resource_key(namespace, name);
    retry::wait_until_object_deleted(client, &key, timings).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockObjectClient;
    use k8s_openapi::api::core::v1::ConfigMap;
    use serde_json::json;
    use std::time::Duration;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .add(&ConfigMap {
                metadata: ObjectMeta {
                    name: Some("foo".to_string()),
                    namespace: Some("kube-system".to_string()),
                    ..Default::default()
                },
                data: Some(BTreeMap::from([("key".to_string(), "value".to_string())])),
                ..Default::default()
            })
            .unwrap();
        registry
    }

    fn timings() -> WaitTimings {
        WaitTimings::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
            Duration::from_millis(50),
        )
    }

    #[tokio::test]
    async fn test_create_for_seed() {
        let client = MockObjectClient::new();
        create_for_seed(&client, "shoot--foo--bar", "kube-state-metrics", false, &registry())
            .await
            .unwrap();

        let mr = client
            .object(&managed_resource_key("shoot--foo--bar", "kube-state-metrics"))
            .unwrap();
        assert_eq!(
            mr.data["spec"],
            json!({
                "class": "seed",
                "secretRefs": [{"name": "managedresource-kube-state-metrics"}],
                "keepObjects": false
            })
        );

        let secret = client
            .object(&secret_key("shoot--foo--bar", "kube-state-metrics"))
            .unwrap();
        assert_eq!(secret.data["type"], "Opaque");
        let bundle = decode_bundle(&secret).unwrap();
        assert_eq!(
            bundle.keys().collect::<Vec<_>>(),
            vec!["configmap__kube-system__foo.yaml"]
        );
        assert!(bundle["configmap__kube-system__foo.yaml"].contains("key: value"));
    }

    #[tokio::test]
    async fn test_create_for_shoot() {
        let client = MockObjectClient::new();
        create_for_shoot(&client, "shoot--foo--bar", "shoot-core-apiserver-proxy", false, &registry())
            .await
            .unwrap();

        let mr = client
            .object(&managed_resource_key("shoot--foo--bar", "shoot-core-apiserver-proxy"))
            .unwrap();
        assert_eq!(mr.data["spec"].get("class"), None);
        assert_eq!(
            mr.data["spec"]["injectLabels"],
            json!({"shoot.gardener.cloud/no-cleanup": "true"})
        );
        assert_eq!(
            mr.metadata.labels.unwrap().get("origin").map(String::as_str),
            Some("gardener")
        );
    }

    #[tokio::test]
    async fn test_wait_until_healthy() {
        let client = MockObjectClient::new();
        create_for_seed(&client, "ns", "mr", false, &registry()).await.unwrap();

        let key = managed_resource_key("ns", "mr");
        client.push_status(
            &key,
            json!({
                "observedGeneration": 1,
                "conditions": [
                    {"type": "ResourcesApplied", "status": "True"},
                    {"type": "ResourcesHealthy", "status": "Progressing"}
                ]
            }),
        );
        client.push_status(
            &key,
            json!({
                "observedGeneration": 1,
                "conditions": [
                    {"type": "ResourcesApplied", "status": "True"},
                    {"type": "ResourcesHealthy", "status": "True"}
                ]
            }),
        );

        wait_until_healthy(&client, "ns", "mr", &timings()).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_healthy_times_out() {
        let client = MockObjectClient::new();
        create_for_seed(&client, "ns", "mr", false, &registry()).await.unwrap();

        let err = wait_until_healthy(&client, "ns", "mr", &timings())
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("observed generation outdated"));
    }

    #[tokio::test]
    async fn test_delete() {
        let client = MockObjectClient::new();
        create_for_seed(&client, "ns", "mr", false, &registry()).await.unwrap();

        delete(&client, "ns", "mr").await.unwrap();
        assert!(client.keys().is_empty());

        wait_until_deleted(&client, "ns", "mr", &timings()).await.unwrap();
        delete(&client, "ns", "mr").await.unwrap();
    }
}

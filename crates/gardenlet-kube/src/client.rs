//! Object client abstraction over the Kubernetes API
//!
//! Every component talks to the cluster through [`ObjectClient`]. The
//! production implementation is [`KubeObjectClient`]; tests use
//! [`crate::mock::MockObjectClient`].
//!
//! Concurrent writes to the same object are arbitrated by the API server's
//! optimistic concurrency; the client adds no locking of its own.

use std::collections::BTreeMap;

use async_trait::async_trait;
use gardenlet_core::ObjectKey;
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams},
    core::GroupVersionKind,
    discovery::{Discovery, Scope},
};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::{KubeError, Result};
use crate::object::key_of;

/// Field manager name for Server-Side Apply
pub const FIELD_MANAGER: &str = "gardenlet";

/// Result of applying a single object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResult {
    /// Object identity
    pub key: ObjectKey,
    /// Whether it was created (true) or updated (false)
    pub created: bool,
}

/// Result of deleting a single object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResult {
    /// Object identity
    pub key: ObjectKey,
    /// Whether a delete was issued (false if the object did not exist)
    pub deleted: bool,
}

/// Minimal set of API operations needed by component deployers
///
/// Implementations must be Send + Sync; one client is shared by all
/// components of a deployment flow.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// Read an object, `None` if it does not exist
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>>;

    /// Create the object or patch it to the desired state
    async fn apply(&self, object: &DynamicObject) -> Result<ApplyResult>;

    /// Merge the given annotations into the object's metadata
    async fn patch_annotations(
        &self,
        key: &ObjectKey,
        annotations: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Merge the given value into the object's status subresource
    async fn patch_status(&self, key: &ObjectKey, status: &Value) -> Result<()>;

    /// Delete an object; a missing object is not an error
    async fn delete(&self, key: &ObjectKey) -> Result<DeleteResult>;
}

/// [`ObjectClient`] backed by a real API server
pub struct KubeObjectClient {
    /// Kubernetes client
    client: Client,
    /// Cached discovery information
    discovery: Discovery,
}

impl KubeObjectClient {
    /// Create a client and run API discovery
    pub async fn new(client: Client) -> Result<Self> {
        let discovery = Discovery::new(client.clone()).run().await?;
        Ok(Self { client, discovery })
    }

    /// Create from existing client and discovery (for reuse)
    pub fn with_discovery(client: Client, discovery: Discovery) -> Self {
        Self { client, discovery }
    }

    /// Refresh discovery cache (call after CRD changes)
    pub async fn refresh_discovery(&mut self) -> Result<()> {
        self.discovery = Discovery::new(self.client.clone()).run().await?;
        Ok(())
    }

    /// Get the underlying Kubernetes client
    pub fn kube_client(&self) -> &Client {
        &self.client
    }

    fn api_for(&self, key: &ObjectKey) -> Result<Api<DynamicObject>> {
        let gvk = GroupVersionKind::gvk(key.group(), key.version(), &key.kind);
        let (api_resource, capabilities) =
            self.discovery
                .resolve_gvk(&gvk)
                .ok_or_else(|| KubeError::UnknownResourceType {
                    api_version: key.api_version.clone(),
                    kind: key.kind.clone(),
                })?;

        match (capabilities.scope, key.namespace.as_deref()) {
            (Scope::Namespaced, Some(ns)) => {
                Ok(Api::namespaced_with(self.client.clone(), ns, &api_resource))
            }
            (Scope::Namespaced, None) => Err(KubeError::InvalidObject(format!(
                "{} is namespaced but has no namespace",
                key
            ))),
            (Scope::Cluster, _) => Ok(Api::all_with(self.client.clone(), &api_resource)),
        }
    }
}

/// API errors keep their status code so callers can tell not-found from a failed request
fn apply_error(key: &ObjectKey, err: kube::Error) -> KubeError {
    debug!(object = %key, error = %err, "Failed to apply object");
    KubeError::Api(err)
}

#[async_trait]
impl ObjectClient for KubeObjectClient {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        let api = self.api_for(key)?;
        Ok(api.get_opt(&key.name).await?)
    }

    async fn apply(&self, object: &DynamicObject) -> Result<ApplyResult> {
        let key = key_of(object)?;
        let api = self.api_for(&key)?;

        let exists = api.get_opt(&key.name).await?.is_some();

        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true;

        api.patch(&key.name, &params, &Patch::Apply(object))
            .await
            .map_err(|e| apply_error(&key, e))?;

        debug!(object = %key, created = !exists, "Applied object");
        Ok(ApplyResult {
            key,
            created: !exists,
        })
    }

    async fn patch_annotations(
        &self,
        key: &ObjectKey,
        annotations: &BTreeMap<String, String>,
    ) -> Result<()> {
        let api = self.api_for(key)?;
        let patch = json!({ "metadata": { "annotations": annotations } });
        match api
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(KubeError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn patch_status(&self, key: &ObjectKey, status: &Value) -> Result<()> {
        let api = self.api_for(key)?;
        let patch = json!({ "status": status });
        match api
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(KubeError::NotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &ObjectKey) -> Result<DeleteResult> {
        let api = self.api_for(key)?;
        match api.delete(&key.name, &DeleteParams::default()).await {
            Ok(_) => Ok(DeleteResult {
                key: key.clone(),
                deleted: true,
            }),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(DeleteResult {
                key: key.clone(),
                deleted: false,
            }),
            Err(e) => Err(e.into()),
        }
    }
}

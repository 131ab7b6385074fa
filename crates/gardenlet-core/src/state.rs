//! Snapshot of extension state captured before a control plane migration

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Cluster-wide state captured for a shoot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShootState {
    /// State blobs of extension resources
    #[serde(default)]
    pub extensions: Vec<ExtensionResourceState>,
}

/// Captured state of one extension resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionResourceState {
    /// Extension kind, e.g. `Infrastructure`
    pub kind: String,

    /// Object name (absent for singleton extensions)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Purpose discriminator for kinds deployed more than once
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,

    /// Opaque state blob written by the extension controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,

    /// Resources referenced by the state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<NamedResourceReference>,
}

/// Named reference to an object stored alongside extension state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamedResourceReference {
    pub name: String,
    pub resource_ref: CrossVersionObjectReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossVersionObjectReference {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
}

impl ShootState {
    /// Find the captured state of an extension resource
    pub fn extension(
        &self,
        kind: &str,
        name: Option<&str>,
        purpose: Option<&str>,
    ) -> Option<&ExtensionResourceState> {
        self.extensions.iter().find(|e| {
            e.kind == kind && e.name.as_deref() == name && e.purpose.as_deref() == purpose
        })
    }
}

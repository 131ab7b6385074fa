//! Helpers for working with dynamically typed objects
//!
//! Desired objects are built as typed structs (k8s-openapi types or the
//! serde specs of extension resources) and handed to the client as
//! [`DynamicObject`]s, so one client serves every kind.

use gardenlet_core::ObjectKey;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use kube::core::TypeMeta;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{KubeError, Result};

/// Build a dynamic object from its type, metadata and top-level fields
///
/// `fields` must be a JSON object such as `{"spec": {...}}`.
pub fn new_dynamic_object(
    api_version: &str,
    kind: &str,
    metadata: ObjectMeta,
    fields: Value,
) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
        }),
        metadata,
        data: fields,
    }
}

/// Convert any serialisable Kubernetes object into a dynamic object
pub fn to_dynamic_object<T: Serialize>(object: &T) -> Result<DynamicObject> {
    let value = serde_json::to_value(object)?;
    let dynamic: DynamicObject = serde_json::from_value(value)?;
    if dynamic.types.is_none() {
        return Err(KubeError::InvalidObject(
            "object is missing apiVersion or kind".to_string(),
        ));
    }
    Ok(dynamic)
}

/// Identity of a dynamic object
pub fn key_of(object: &DynamicObject) -> Result<ObjectKey> {
    let types = object
        .types
        .as_ref()
        .ok_or_else(|| KubeError::InvalidObject("object is missing apiVersion or kind".to_string()))?;
    let name = object
        .metadata
        .name
        .clone()
        .ok_or_else(|| KubeError::InvalidObject("object is missing metadata.name".to_string()))?;

    Ok(ObjectKey {
        api_version: types.api_version.clone(),
        kind: types.kind.clone(),
        namespace: object.metadata.namespace.clone(),
        name,
    })
}

/// Metadata carrying only name and (optional) namespace
pub fn object_meta(key: &ObjectKey) -> ObjectMeta {
    ObjectMeta {
        name: Some(key.name.clone()),
        namespace: key.namespace.clone(),
        ..Default::default()
    }
}

/// Deserialize `.status` of an object, `None` if it has no status yet
pub fn status_of<T: DeserializeOwned>(object: &DynamicObject) -> Result<Option<T>> {
    match object.data.get("status") {
        None | Some(Value::Null) => Ok(None),
        Some(status) => Ok(Some(serde_json::from_value(status.clone())?)),
    }
}

/// Value of an annotation
pub fn annotation<'a>(object: &'a DynamicObject, key: &str) -> Option<&'a str> {
    object
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Set an annotation on object metadata
pub fn set_annotation(metadata: &mut ObjectMeta, key: &str, value: impl Into<String>) {
    metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.into());
}

/// Set a label on object metadata
pub fn set_label(metadata: &mut ObjectMeta, key: &str, value: impl Into<String>) {
    metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.into());
}

//! Serialising registry for desired objects
//!
//! Component builders add fully populated objects to a [`Registry`]; the
//! registry turns them into named YAML documents that are handed to the
//! managed resource reconciler as one bundle.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{CoreError, Result};

/// Collection of serialised objects keyed by file name
#[derive(Debug, Clone, Default)]
pub struct Registry {
    objects: BTreeMap<String, String>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialise an object and add it to the registry
    ///
    /// The object must serialise to a map carrying `kind` and `metadata.name`.
    pub fn add<T: Serialize>(&mut self, object: &T) -> Result<()> {
        let value = serde_json::to_value(object)?;
        let filename = object_filename(&value)?;

        if self.objects.contains_key(&filename) {
            return Err(CoreError::DuplicateObject { filename });
        }

        let yaml = serde_yaml::to_string(&value)?;
        self.objects.insert(filename, yaml);
        Ok(())
    }

    /// Add an object only when present
    pub fn add_optional<T: Serialize>(&mut self, object: Option<&T>) -> Result<()> {
        match object {
            Some(object) => self.add(object),
            None => Ok(()),
        }
    }

    /// Number of registered objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether nothing was registered
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// File names of all registered objects
    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.objects.keys().map(String::as_str)
    }

    /// Serialised objects keyed by file name
    pub fn serialized_objects(&self) -> BTreeMap<String, String> {
        self.objects.clone()
    }

    /// Consume the registry and return the serialised objects
    pub fn into_serialized_objects(self) -> BTreeMap<String, String> {
        self.objects
    }
}

/// `<lowercase kind>__<namespace>__<name>.yaml`, with `:` in names replaced by `_`
fn object_filename(value: &Value) -> Result<String> {
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| CoreError::MissingField {
            field: "kind".to_string(),
        })?;

    let metadata = value.get("metadata");
    let name = metadata
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| CoreError::MissingField {
            field: "metadata.name".to_string(),
        })?;
    let namespace = metadata
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str)
        .unwrap_or("");

    Ok(format!(
        "{}__{}__{}.yaml",
        kind.to_lowercase(),
        namespace,
        name.replace(':', "_")
    ))
}

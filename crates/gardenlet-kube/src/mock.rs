//! In-memory object client for testing
//!
//! Behaves like a small API server: generations are bumped when the spec
//! changes, objects with finalizers are only marked for deletion, and the
//! status subresource is never written by `apply`. Scripted reactions stand
//! in for the external controller that owns an object: each `get` pops at
//! most one reaction for the requested object and applies it first.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use gardenlet_core::ObjectKey;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use serde_json::{Map, Value};

use crate::client::{ApplyResult, DeleteResult, ObjectClient};
use crate::error::{KubeError, Result};
use crate::object::key_of;

type Mutation = Box<dyn FnMut(&mut DynamicObject) + Send + Sync>;

/// Simulated controller action
enum Reaction {
    Mutate(Mutation),
    Remove,
}

/// In-memory object client
#[derive(Clone, Default)]
pub struct MockObjectClient {
    /// Stored objects
    objects: Arc<RwLock<BTreeMap<ObjectKey, DynamicObject>>>,
    /// Pending controller reactions per object
    reactions: Arc<RwLock<HashMap<ObjectKey, VecDeque<Reaction>>>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub applies: usize,
    pub annotation_patches: usize,
    pub status_patches: usize,
    pub deletes: usize,
}

impl MockObjectClient {
    /// Create a new empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as-is, bypassing apply semantics
    pub fn insert(&self, object: DynamicObject) -> Result<()> {
        let key = key_of(&object)?;
        self.objects.write().unwrap().insert(key, object);
        Ok(())
    }

    /// Current state of an object
    pub fn object(&self, key: &ObjectKey) -> Option<DynamicObject> {
        self.objects.read().unwrap().get(key).cloned()
    }

    /// Keys of all stored objects
    pub fn keys(&self) -> Vec<ObjectKey> {
        self.objects.read().unwrap().keys().cloned().collect()
    }

    /// Overwrite the status of an object immediately
    pub fn set_status(&self, key: &ObjectKey, status: Value) -> Result<()> {
        let mut objects = self.objects.write().unwrap();
        let object = objects.get_mut(key).ok_or_else(|| KubeError::NotFound {
            key: key.to_string(),
        })?;
        object.data["status"] = status;
        Ok(())
    }

    /// Queue a controller reaction that runs on a later `get`
    pub fn push_reaction(
        &self,
        key: &ObjectKey,
        reaction: impl FnMut(&mut DynamicObject) + Send + Sync + 'static,
    ) {
        self.reactions
            .write()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push_back(Reaction::Mutate(Box::new(reaction)));
    }

    /// Queue a status the controller will report on a later `get`
    pub fn push_status(&self, key: &ObjectKey, status: Value) {
        self.push_reaction(key, move |object| {
            object.data["status"] = status.clone();
        });
    }

    /// Queue the final removal of an object (e.g. finalizers released)
    pub fn push_removal(&self, key: &ObjectKey) {
        self.reactions
            .write()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push_back(Reaction::Remove);
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations.read().unwrap().clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        *self.operations.write().unwrap() = OperationCounts::default();
    }

    fn react(&self, key: &ObjectKey) {
        let mut objects = self.objects.write().unwrap();
        if !objects.contains_key(key) {
            return;
        }

        let reaction = self
            .reactions
            .write()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front);

        match reaction {
            Some(Reaction::Mutate(mut mutate)) => {
                if let Some(object) = objects.get_mut(key) {
                    mutate(object);
                }
            }
            Some(Reaction::Remove) => {
                objects.remove(key);
            }
            None => {}
        }
    }
}

fn fields_mut(object: &mut DynamicObject) -> &mut Map<String, Value> {
    if !object.data.is_object() {
        object.data = Value::Object(Map::new());
    }
    match &mut object.data {
        Value::Object(map) => map,
        _ => unreachable!("data was just normalised to an object"),
    }
}

fn merge_string_map(
    target: &mut Option<BTreeMap<String, String>>,
    source: &Option<BTreeMap<String, String>>,
) {
    if let Some(source) = source {
        let target = target.get_or_insert_with(Default::default);
        for (k, v) in source {
            target.insert(k.clone(), v.clone());
        }
    }
}

#[async_trait]
impl ObjectClient for MockObjectClient {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>> {
        self.operations.write().unwrap().gets += 1;
        self.react(key);
        Ok(self.object(key))
    }

    async fn apply(&self, object: &DynamicObject) -> Result<ApplyResult> {
        self.operations.write().unwrap().applies += 1;

        let key = key_of(object)?;
        let mut objects = self.objects.write().unwrap();

        match objects.get_mut(&key) {
            Some(existing) => {
                let spec_changed = existing.data.get("spec") != object.data.get("spec");

                merge_string_map(&mut existing.metadata.labels, &object.metadata.labels);
                merge_string_map(
                    &mut existing.metadata.annotations,
                    &object.metadata.annotations,
                );
                if object.metadata.finalizers.is_some() {
                    existing.metadata.finalizers = object.metadata.finalizers.clone();
                }
                if object.metadata.owner_references.is_some() {
                    existing.metadata.owner_references = object.metadata.owner_references.clone();
                }

                let desired = object.data.as_object().cloned().unwrap_or_default();
                let fields = fields_mut(existing);
                for (field, value) in desired {
                    if field != "status" {
                        fields.insert(field, value);
                    }
                }

                if spec_changed {
                    existing.metadata.generation = Some(existing.metadata.generation.unwrap_or(0) + 1);
                }

                Ok(ApplyResult {
                    key,
                    created: false,
                })
            }
            None => {
                let mut created = object.clone();
                created.metadata.generation = Some(1);
                created.metadata.resource_version = Some("1".to_string());
                fields_mut(&mut created).remove("status");
                objects.insert(key.clone(), created);

                Ok(ApplyResult { key, created: true })
            }
        }
    }

    async fn patch_annotations(
        &self,
        key: &ObjectKey,
        annotations: &BTreeMap<String, String>,
    ) -> Result<()> {
        self.operations.write().unwrap().annotation_patches += 1;

        let mut objects = self.objects.write().unwrap();
        let object = objects.get_mut(key).ok_or_else(|| KubeError::NotFound {
            key: key.to_string(),
        })?;
        merge_string_map(&mut object.metadata.annotations, &Some(annotations.clone()));
        Ok(())
    }

    async fn patch_status(&self, key: &ObjectKey, status: &Value) -> Result<()> {
        self.operations.write().unwrap().status_patches += 1;

        let mut objects = self.objects.write().unwrap();
        let object = objects.get_mut(key).ok_or_else(|| KubeError::NotFound {
            key: key.to_string(),
        })?;

        let fields = fields_mut(object);
        let current = fields
            .entry("status".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        match (current.as_object_mut(), status.as_object()) {
            (Some(current), Some(patch)) => {
                for (k, v) in patch {
                    current.insert(k.clone(), v.clone());
                }
            }
            _ => *current = status.clone(),
        }
        Ok(())
    }

    async fn delete(&self, key: &ObjectKey) -> Result<DeleteResult> {
        self.operations.write().unwrap().deletes += 1;

        let mut objects = self.objects.write().unwrap();
        let Some(object) = objects.get_mut(key) else {
            return Ok(DeleteResult {
                key: key.clone(),
                deleted: false,
            });
        };

        let has_finalizers = object
            .metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| !f.is_empty());

        if has_finalizers {
            if object.metadata.deletion_timestamp.is_none() {
                object.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
            }
        } else {
            objects.remove(key);
        }

        Ok(DeleteResult {
            key: key.clone(),
            deleted: true,
        })
    }
}

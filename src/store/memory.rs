//! # In-Memory Store
//!
//! A [`ResourceStore`] that keeps objects in process. It reproduces the parts
//! of API server behaviour the engine depends on:
//!
//! - resource versions bumped on every write, `update` rejected on mismatch
//! - `generation` incremented whenever the spec changes
//! - status only writable through `patch_status`
//! - deletion deferred while finalizers remain, physical removal once they are gone
//!
//! Operation counters and one-shot injected failures make it usable as a test double.

use super::merge::apply_merge_patch;
use super::{object_key, ResourceStore, StoreError, StoredObject};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

/// Store operation, used for call counting and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    List,
    Create,
    Patch,
    PatchStatus,
    Update,
    Delete,
}

/// Failure returned by the next call of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    Conflict,
    NotFound,
    Backend(String),
}

#[derive(Debug)]
struct State<K> {
    objects: BTreeMap<(String, String), K>,
    next_version: u64,
    calls: HashMap<Operation, usize>,
    failures: VecDeque<(Operation, InjectedFailure)>,
}

/// In-process resource store
#[derive(Debug)]
pub struct MemoryStore<K> {
    state: Mutex<State<K>>,
}

impl<K: StoredObject> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn key_of<K: StoredObject>(obj: &K) -> (String, String) {
    (
        obj.meta().namespace.clone().unwrap_or_else(|| "default".to_string()),
        obj.meta().name.clone().unwrap_or_default(),
    )
}

/// Copy of `obj` with a metadata timestamp field set to now
fn with_timestamp<K: StoredObject>(obj: &K, field: &str) -> Result<K, StoreError> {
    let mut value = serde_json::to_value(obj)?;
    value["metadata"][field] = serde_json::Value::String(
        chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    );
    Ok(serde_json::from_value(value)?)
}

impl<K: StoredObject> MemoryStore<K> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                next_version: 1,
                calls: HashMap::new(),
                failures: VecDeque::new(),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State<K>>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::Backend(format!("memory store lock poisoned: {e}")))
    }

    /// Seed an object as-is (status included), assigning a resource version
    /// and generation 1 when missing
    pub fn insert(&self, mut obj: K) -> Result<K, StoreError> {
        let mut state = self.lock()?;
        if obj.meta().namespace.is_none() {
            obj.meta_mut().namespace = Some("default".to_string());
        }
        if obj.meta().generation.is_none() {
            obj.meta_mut().generation = Some(1);
        }
        state.stamp_version(&mut obj);
        state.objects.insert(key_of(&obj), obj.clone());
        Ok(obj)
    }

    /// Current copy of an object without touching the counters
    pub fn snapshot(&self, namespace: &str, name: &str) -> Option<K> {
        self.lock()
            .ok()?
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn calls(&self, operation: Operation) -> usize {
        self.lock()
            .map(|s| s.calls.get(&operation).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Make the next call of `operation` fail
    pub fn fail_next(&self, operation: Operation, failure: InjectedFailure) {
        if let Ok(mut state) = self.lock() {
            state.failures.push_back((operation, failure));
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|s| s.objects.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: StoredObject> State<K> {
    fn enter(&mut self, operation: Operation, key: &str) -> Result<(), StoreError> {
        *self.calls.entry(operation).or_insert(0) += 1;
        let position = self.failures.iter().position(|(op, _)| *op == operation);
        match position.and_then(|i| self.failures.remove(i)) {
            Some((_, InjectedFailure::Conflict)) => Err(StoreError::Conflict {
                key: key.to_string(),
                message: "injected conflict".to_string(),
            }),
            Some((_, InjectedFailure::NotFound)) => Err(StoreError::NotFound {
                key: key.to_string(),
            }),
            Some((_, InjectedFailure::Backend(message))) => Err(StoreError::Backend(message)),
            None => Ok(()),
        }
    }

    fn stamp_version(&mut self, obj: &mut K) {
        obj.meta_mut().resource_version = Some(self.next_version.to_string());
        self.next_version += 1;
    }

    fn existing(&self, key: &(String, String)) -> Result<&K, StoreError> {
        self.objects.get(key).ok_or_else(|| StoreError::NotFound {
            key: format!("{}/{}", key.0, key.1),
        })
    }

    /// Persist `updated` over `current`, bumping generation when the spec changed
    /// and dropping the object once deletion is no longer blocked
    fn commit(
        &mut self,
        key: (String, String),
        current: &serde_json::Value,
        mut updated: serde_json::Value,
    ) -> Result<K, StoreError> {
        if updated.get("spec") != current.get("spec") {
            let generation = current["metadata"]["generation"].as_i64().unwrap_or(0) + 1;
            updated["metadata"]["generation"] = serde_json::json!(generation);
        }
        let mut obj: K = serde_json::from_value(updated)?;
        self.stamp_version(&mut obj);
        let removable = obj.meta().deletion_timestamp.is_some()
            && obj.meta().finalizers.as_ref().is_none_or(Vec::is_empty);
        if removable {
            self.objects.remove(&key);
        } else {
            self.objects.insert(key, obj.clone());
        }
        Ok(obj)
    }
}

#[async_trait]
impl<K: StoredObject> ResourceStore<K> for MemoryStore<K> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        let mut state = self.lock()?;
        state.enter(Operation::Get, &format!("{namespace}/{name}"))?;
        Ok(state
            .objects
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, StoreError> {
        let mut state = self.lock()?;
        state.enter(Operation::List, namespace.unwrap_or("*"))?;
        let requirements: Vec<(&str, &str)> = label_selector
            .unwrap_or_default()
            .split(',')
            .filter_map(|r| r.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();
        Ok(state
            .objects
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|wanted| wanted == ns.as_str()))
            .filter(|(_, obj)| {
                requirements.iter().all(|(k, v)| {
                    obj.meta()
                        .labels
                        .as_ref()
                        .and_then(|l| l.get(*k))
                        .is_some_and(|actual| actual.as_str() == *v)
                })
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let mut state = self.lock()?;
        state.enter(Operation::Create, &object_key(obj))?;
        let mut created = obj.clone();
        if created.meta().name.is_none() {
            let prefix = created.meta().generate_name.clone().unwrap_or_default();
            created.meta_mut().name = Some(format!("{prefix}{:05}", state.next_version));
        }
        if created.meta().namespace.is_none() {
            created.meta_mut().namespace = Some("default".to_string());
        }
        let key = key_of(&created);
        if state.objects.contains_key(&key) {
            return Err(StoreError::Conflict {
                key: format!("{}/{}", key.0, key.1),
                message: "already exists".to_string(),
            });
        }
        created.meta_mut().generation = Some(1);
        let mut created = with_timestamp(&created, "creationTimestamp")?;
        state.stamp_version(&mut created);
        state.objects.insert(key, created.clone());
        Ok(created)
    }

    async fn patch(&self, obj: &K, patch: &serde_json::Value) -> Result<K, StoreError> {
        let mut state = self.lock()?;
        state.enter(Operation::Patch, &object_key(obj))?;
        let key = key_of(obj);
        let current = serde_json::to_value(state.existing(&key)?)?;
        let mut patch = patch.clone();
        if let Some(map) = patch.as_object_mut() {
            map.remove("status");
        }
        let mut updated = current.clone();
        apply_merge_patch(&mut updated, &patch);
        state.commit(key, &current, updated)
    }

    async fn patch_status(&self, obj: &K, patch: &serde_json::Value) -> Result<K, StoreError> {
        let mut state = self.lock()?;
        state.enter(Operation::PatchStatus, &object_key(obj))?;
        let key = key_of(obj);
        let current = serde_json::to_value(state.existing(&key)?)?;
        let mut updated = current.clone();
        if let Some(status) = patch.get("status") {
            apply_merge_patch(&mut updated["status"], status);
        }
        state.commit(key, &current, updated)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let mut state = self.lock()?;
        state.enter(Operation::Update, &object_key(obj))?;
        let key = key_of(obj);
        let stored = state.existing(&key)?;
        if stored.meta().resource_version != obj.meta().resource_version {
            return Err(StoreError::Conflict {
                key: format!("{}/{}", key.0, key.1),
                message: format!(
                    "resource version {:?} is stale, current is {:?}",
                    obj.meta().resource_version,
                    stored.meta().resource_version
                ),
            });
        }
        let current = serde_json::to_value(stored)?;
        let mut updated = serde_json::to_value(obj)?;
        // Status is a subresource; a full replace never changes it
        match current.get("status") {
            Some(status) => updated["status"] = status.clone(),
            None => {
                if let Some(map) = updated.as_object_mut() {
                    map.remove("status");
                }
            }
        }
        updated["metadata"]["generation"] = current["metadata"]["generation"].clone();
        updated["metadata"]["deletionTimestamp"] = current["metadata"]["deletionTimestamp"].clone();
        state.commit(key, &current, updated)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state.enter(Operation::Delete, &format!("{namespace}/{name}"))?;
        let key = (namespace.to_string(), name.to_string());
        let mut obj = state.existing(&key)?.clone();
        if obj.meta().finalizers.as_ref().is_none_or(Vec::is_empty) {
            state.objects.remove(&key);
            return Ok(());
        }
        if obj.meta().deletion_timestamp.is_none() {
            obj = with_timestamp(&obj, "deletionTimestamp")?;
            state.stamp_version(&mut obj);
            state.objects.insert(key, obj);
        }
        Ok(())
    }
}

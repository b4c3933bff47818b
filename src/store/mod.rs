//! # Resource Store
//!
//! The resource store is an external collaborator: the engine only ever holds
//! an in-memory working copy of a resource and talks to the store through
//! [`ResourceStore`].
//!
//! - [`KubeStore`] - backed by the Kubernetes API server
//! - [`MemoryStore`] - in-process store with the same concurrency semantics
//! - [`merge`] - JSON merge patch (RFC 7386) helpers

mod kube_store;
pub mod memory;
pub mod merge;

pub use kube_store::KubeStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use kube::Resource;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use thiserror::Error;

/// Anything the store can persist
pub trait StoredObject:
    Resource<DynamicType = ()>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<T> StoredObject for T where
    T: Resource<DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Store operation failure
#[derive(Debug, Error)]
pub enum StoreError {
    /// Optimistic-concurrency failure: the object changed since it was read
    #[error("conflict writing {key}: {message}")]
    Conflict { key: String, message: String },
    #[error("{key} not found")]
    NotFound { key: String },
    #[error("failed to (de)serialize resource: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("kubernetes API error for {key}: {source}")]
    Kube {
        key: String,
        #[source]
        source: kube::Error,
    },
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Classify a kube client error; 409 and 404 get their own variants
    pub fn from_kube(key: impl Into<String>, error: kube::Error) -> Self {
        let key = key.into();
        match error {
            kube::Error::Api(ref status) if status.code == 409 => StoreError::Conflict {
                key,
                message: status.message.clone(),
            },
            kube::Error::Api(ref status) if status.code == 404 => StoreError::NotFound { key },
            source => StoreError::Kube { key, source },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// CRUD and patch access to one resource kind
#[async_trait]
pub trait ResourceStore<K: StoredObject>: Send + Sync {
    /// `Ok(None)` when the object does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError>;

    /// List objects, across all namespaces when `namespace` is `None`
    async fn list(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, StoreError>;

    /// Create an object; a templated `generateName` gets a concrete name
    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    /// Merge patch metadata and spec of `obj`
    async fn patch(&self, obj: &K, patch: &serde_json::Value) -> Result<K, StoreError>;

    /// Merge patch the status subresource of `obj`
    async fn patch_status(&self, obj: &K, patch: &serde_json::Value) -> Result<K, StoreError>;

    /// Full replace guarded by `obj`'s resource version
    async fn update(&self, obj: &K) -> Result<K, StoreError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// Merge patch carrying only what changed between `original` and `modified`
    async fn patch_from(&self, modified: &K, original: &K) -> Result<K, StoreError> {
        let before = serde_json::to_value(original)?;
        let after = serde_json::to_value(modified)?;
        match merge::merge_patch_diff(&before, &after) {
            Some(patch) => self.patch(modified, &patch).await,
            None => Ok(modified.clone()),
        }
    }
}

/// `namespace/name` of any stored object
pub fn object_key<K: StoredObject>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.meta().namespace.as_deref().unwrap_or("default"),
        obj.meta().name.as_deref().unwrap_or("unknown")
    )
}

//! # Kubernetes Store
//!
//! [`ResourceStore`] backed by `kube::Api` for namespaced kinds.

use super::{object_key, ResourceStore, StoreError, StoredObject};
use crate::constants::FIELD_MANAGER;
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource};
use std::marker::PhantomData;

/// Store for one namespaced kind
#[derive(Clone)]
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> std::fmt::Debug for KubeStore<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl<K> KubeStore<K>
where
    K: StoredObject + Resource<Scope = NamespaceResourceScope>,
{
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn api_for(&self, obj: &K) -> Api<K> {
        self.api(obj.meta().namespace.as_deref().unwrap_or("default"))
    }

    fn name_of(obj: &K) -> Result<&str, StoreError> {
        obj.meta()
            .name
            .as_deref()
            .ok_or_else(|| StoreError::Backend(format!("{} has no name", object_key(obj))))
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PostParams::default()
        }
    }
}

#[async_trait]
impl<K> ResourceStore<K> for KubeStore<K>
where
    K: StoredObject + Resource<Scope = NamespaceResourceScope>,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, StoreError> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube(format!("{namespace}/{name}"), e))
    }

    async fn list(
        &self,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<K>, StoreError> {
        let api = match namespace {
            Some(ns) => self.api(ns),
            None => Api::all(self.client.clone()),
        };
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = api
            .list(&params)
            .await
            .map_err(|e| StoreError::from_kube(namespace.unwrap_or("*"), e))?;
        Ok(list.items)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        self.api_for(obj)
            .create(&Self::post_params(), obj)
            .await
            .map_err(|e| StoreError::from_kube(object_key(obj), e))
    }

    async fn patch(&self, obj: &K, patch: &serde_json::Value) -> Result<K, StoreError> {
        let name = Self::name_of(obj)?;
        self.api_for(obj)
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(object_key(obj), e))
    }

    async fn patch_status(&self, obj: &K, patch: &serde_json::Value) -> Result<K, StoreError> {
        let name = Self::name_of(obj)?;
        self.api_for(obj)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
            .map_err(|e| StoreError::from_kube(object_key(obj), e))
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let name = Self::name_of(obj)?;
        self.api_for(obj)
            .replace(name, &Self::post_params(), obj)
            .await
            .map_err(|e| StoreError::from_kube(object_key(obj), e))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(format!("{namespace}/{name}"), e))
    }
}

//! # Finalizer Management
//!
//! A finalizer is a named marker that must be gone before the store physically
//! deletes a resource.
//!
//! ```text
//! no-finalizer --ensure_present--> finalizer-present
//!     --deletionTimestamp set--> deletion-pending
//!     --cleanup steps + ensure_removed--> removable (store deletes it)
//! ```
//!
//! Finalizer list changes use a full `update` so the store's optimistic
//! concurrency check applies. The engine never issues a delete for the
//! resource itself.

use crate::constants::{DELETE_DEPENDENTS_FINALIZER, IMMEDIATE_REQUEUE_MS};
use crate::controller::error::ReconcileError;
use crate::controller::runner::Outcome;
use crate::crd::Converged;
use crate::store::ResourceStore;
use kube::Resource;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalizer {
    name: String,
}

impl Default for Finalizer {
    fn default() -> Self {
        Self::new(crate::constants::FINALIZER_NAME)
    }
}

impl Finalizer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has<K: Resource>(&self, resource: &K) -> bool {
        resource
            .meta()
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|n| *n == self.name))
    }

    /// True only when deletion was requested and no foreign finalizer still
    /// guards the resource. Accepted sets: `{}`, `{ours}`, `{ours, delete-dependents}`.
    pub fn is_deletion_candidate<K: Resource>(&self, resource: &K) -> bool {
        if resource.meta().deletion_timestamp.is_none() {
            return false;
        }
        let finalizers = resource.meta().finalizers.as_deref().unwrap_or_default();
        let ours = self.name.as_str();
        match finalizers {
            [] => true,
            [only] => only == ours,
            [a, b] => {
                (a == ours && b == DELETE_DEPENDENTS_FINALIZER)
                    || (a == DELETE_DEPENDENTS_FINALIZER && b == ours)
            }
            _ => false,
        }
    }

    /// Add the finalizer to a live resource. Requests an immediate requeue when
    /// it was added so the next pass works against the updated object.
    pub async fn ensure_present<K: Converged>(
        &self,
        store: &dyn ResourceStore<K>,
        resource: &mut K,
    ) -> Result<Outcome, ReconcileError> {
        if resource.is_being_deleted() || self.has(resource) {
            return Ok(Outcome::Continue);
        }
        let mut updated = resource.clone();
        updated
            .meta_mut()
            .finalizers
            .get_or_insert_with(Vec::new)
            .push(self.name.clone());
        let stored = store.update(&updated).await?;
        adopt_metadata(resource, &stored);
        info!(
            resource = %resource.resource_key(),
            finalizer = %self.name,
            "finalizer.added"
        );
        Ok(Outcome::Requeue(Duration::from_millis(IMMEDIATE_REQUEUE_MS)))
    }

    /// Strip the finalizer; a no-op when it is already absent
    pub async fn ensure_removed<K: Converged>(
        &self,
        store: &dyn ResourceStore<K>,
        resource: &mut K,
    ) -> Result<(), ReconcileError> {
        if !self.has(resource) {
            return Ok(());
        }
        let mut updated = resource.clone();
        if let Some(finalizers) = updated.meta_mut().finalizers.as_mut() {
            finalizers.retain(|n| *n != self.name);
        }
        match store.update(&updated).await {
            Ok(stored) => adopt_metadata(resource, &stored),
            Err(e) if e.is_not_found() => {
                debug!(resource = %resource.resource_key(), "resource already gone");
                *resource.meta_mut() = updated.meta().clone();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            resource = %resource.resource_key(),
            finalizer = %self.name,
            "finalizer.removed"
        );
        Ok(())
    }
}

/// Take the stored metadata (new resource version, finalizers) while keeping
/// the in-memory status of the working copy
fn adopt_metadata<K: Resource>(resource: &mut K, stored: &K) {
    *resource.meta_mut() = stored.meta().clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn with_finalizers(finalizers: &[&str], deleting: bool) -> ConfigMap {
        let mut value = serde_json::json!({
            "metadata": {
                "name": "a",
                "namespace": "default",
                "finalizers": finalizers,
            }
        });
        if deleting {
            value["metadata"]["deletionTimestamp"] = "2026-01-01T00:00:00Z".into();
        }
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_deletion_candidate_sets() {
        let f = Finalizer::new("example.com/ours");
        assert!(f.is_deletion_candidate(&with_finalizers(&[], true)));
        assert!(f.is_deletion_candidate(&with_finalizers(&["example.com/ours"], true)));
        assert!(f.is_deletion_candidate(&with_finalizers(
            &["example.com/ours", DELETE_DEPENDENTS_FINALIZER],
            true
        )));
        assert!(f.is_deletion_candidate(&with_finalizers(
            &[DELETE_DEPENDENTS_FINALIZER, "example.com/ours"],
            true
        )));
        assert!(!f.is_deletion_candidate(&with_finalizers(
            &["example.com/ours", "foreign"],
            true
        )));
        assert!(!f.is_deletion_candidate(&with_finalizers(&["foreign"], true)));
        assert!(!f.is_deletion_candidate(&with_finalizers(&[], false)));
    }

    #[test]
    fn test_has() {
        let f = Finalizer::new("example.com/ours");
        assert!(f.has(&with_finalizers(&["x", "example.com/ours"], false)));
        assert!(!f.has(&ConfigMap {
            metadata: ObjectMeta::default(),
            ..ConfigMap::default()
        }));
    }
}

//! # Shared Steps
//!
//! Steps reused by several step chains.

use crate::constants::CONDITION_READY;
use crate::controller::{Finalizer, Outcome, ReconcileError, Step, StepContext};
use crate::crd::{CloudResource, ConditionDefinition, ConditionReason, ConditionStatus, Converged};
use crate::store::ResourceStore;
use async_trait::async_trait;
use kube::runtime::reflector::ObjectRef;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Register the default conditions of a kind
#[derive(Debug, Clone, Copy)]
pub struct RegisterConditions {
    definitions: &'static [ConditionDefinition],
}

impl RegisterConditions {
    pub const fn new(definitions: &'static [ConditionDefinition]) -> Self {
        Self { definitions }
    }
}

#[async_trait]
impl<K: Converged> Step<K> for RegisterConditions {
    fn name(&self) -> &'static str {
        "register_conditions"
    }

    async fn run(&self, ctx: &mut StepContext<K>) -> Result<Outcome, ReconcileError> {
        let added = ctx.conditions().register(self.definitions);
        if added > 0 {
            debug!(added, "conditions.registered");
        }
        Ok(Outcome::Continue)
    }
}

/// Add the finalizer to live resources
pub struct EnsureFinalizer<K> {
    finalizer: Finalizer,
    store: Arc<dyn ResourceStore<K>>,
}

impl<K> EnsureFinalizer<K> {
    pub fn new(finalizer: Finalizer, store: Arc<dyn ResourceStore<K>>) -> Self {
        Self { finalizer, store }
    }
}

#[async_trait]
impl<K: Converged> Step<K> for EnsureFinalizer<K> {
    fn name(&self) -> &'static str {
        "ensure_finalizer"
    }

    async fn run(&self, ctx: &mut StepContext<K>) -> Result<Outcome, ReconcileError> {
        self.finalizer
            .ensure_present(self.store.as_ref(), &mut ctx.resource)
            .await
    }
}

/// Which reference of a CloudResource points at a dependency
pub type CloudResourceReference = fn(&CloudResource) -> &str;

pub fn plan_reference(resource: &CloudResource) -> &str {
    resource.spec.plan_ref.name.as_str()
}

pub fn provider_reference(resource: &CloudResource) -> &str {
    resource.spec.provider_ref.name.as_str()
}

/// CloudResources in the namespace of `dependency` whose `reference` names it
pub fn dependents<D: Converged>(
    resources: &[Arc<CloudResource>],
    reference: CloudResourceReference,
    dependency: &D,
) -> Vec<ObjectRef<CloudResource>> {
    let namespace = dependency.namespace_or_default();
    let name = dependency.name_or_unknown();
    resources
        .iter()
        .filter(|cr| cr.namespace_or_default() == namespace && reference(cr) == name)
        .map(|cr| ObjectRef::from_obj(cr.as_ref()))
        .collect()
}

/// Deletion path for kinds that CloudResources depend on: hold the finalizer
/// while any CloudResource in the namespace still references the resource
pub struct ReleaseWhenUnreferenced<K> {
    finalizer: Finalizer,
    store: Arc<dyn ResourceStore<K>>,
    cloud_resources: Arc<dyn ResourceStore<CloudResource>>,
    reference: CloudResourceReference,
    poll_interval: Duration,
}

impl<K> ReleaseWhenUnreferenced<K> {
    pub fn new(
        finalizer: Finalizer,
        store: Arc<dyn ResourceStore<K>>,
        cloud_resources: Arc<dyn ResourceStore<CloudResource>>,
        reference: CloudResourceReference,
        poll_interval: Duration,
    ) -> Self {
        Self {
            finalizer,
            store,
            cloud_resources,
            reference,
            poll_interval,
        }
    }
}

#[async_trait]
impl<K: Converged> Step<K> for ReleaseWhenUnreferenced<K> {
    fn name(&self) -> &'static str {
        "release_when_unreferenced"
    }

    async fn run(&self, ctx: &mut StepContext<K>) -> Result<Outcome, ReconcileError> {
        if !ctx.resource.is_being_deleted() {
            return Ok(Outcome::Continue);
        }
        if !self.finalizer.is_deletion_candidate(&ctx.resource) {
            debug!("foreign finalizers present, leaving deletion alone");
            return Ok(Outcome::Stop);
        }

        let name = ctx.resource.name_or_unknown().to_string();
        let namespace = ctx.resource.namespace_or_default().to_string();
        let dependents: Vec<String> = self
            .cloud_resources
            .list(Some(&namespace), None)
            .await?
            .iter()
            .filter(|cr| !cr.is_being_deleted() && (self.reference)(cr) == name)
            .map(|cr| cr.name_or_unknown().to_string())
            .collect();

        if !dependents.is_empty() {
            info!(dependents = dependents.len(), "deletion.blocked");
            ctx.conditions().deleting(
                CONDITION_READY,
                format!(
                    "Waiting for {} CloudResource(s) to release it: {}",
                    dependents.len(),
                    dependents.join(", ")
                ),
            );
            return Ok(Outcome::Requeue(self.poll_interval));
        }

        ctx.conditions().transition(
            CONDITION_READY,
            ConditionStatus::False,
            ConditionReason::Deleted,
            "No longer referenced",
            None,
        );
        self.finalizer
            .ensure_removed(self.store.as_ref(), &mut ctx.resource)
            .await?;
        Ok(Outcome::Stop)
    }
}

/// Record a human-fixable problem on `type` and on Ready, then stop the chain
pub fn require_action<K: Converged>(
    ctx: &mut StepContext<K>,
    r#type: &str,
    message: impl Into<String>,
) -> Outcome {
    let message = message.into();
    let mut conditions = ctx.conditions();
    conditions.action_required(r#type, message.clone());
    if r#type != CONDITION_READY {
        conditions.action_required(CONDITION_READY, message);
    }
    Outcome::Stop
}

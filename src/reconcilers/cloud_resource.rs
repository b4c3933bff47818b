//! # CloudResource Reconciler
//!
//! Drives a CloudResource through its lifecycle:
//!
//! 1. Register the Ready, Plan and Apply conditions
//! 2. On deletion, delete the workspace and release the finalizer
//! 3. Wait for the referenced Provider to be ready
//! 4. Render the latest Plan revision with the resource parameters into the
//!    workspace ConfigMap `<name>-workspace`
//! 5. Mirror the executor results written to the workspace into the Plan and
//!    Apply conditions
//!
//! The executor that actually plans and applies against the cloud provider is
//! external. It watches the workspace, records the generation it processed in
//! the observed-generation annotation and writes `plan.result` / `apply.result`
//! as `Pending`, `Running`, `Succeeded` or `Failed: <message>`.

use super::common::{require_action, EnsureFinalizer, RegisterConditions};
use super::Reconcile;
use crate::config::ControllerConfig;
use crate::constants::{
    CONDITION_APPLY, CONDITION_PLAN, CONDITION_READY, DRIFT_REQUESTED_ANNOTATION,
    WORKSPACE_GENERATION_ANNOTATION, WORKSPACE_OBSERVED_GENERATION_ANNOTATION,
    WORKSPACE_OWNER_LABEL,
};
use crate::controller::{
    Finalizer, Outcome, ReconcileError, RunResult, Runner, RunnerOptions, Step, StepContext,
};
use crate::crd::{
    CloudResource, ConditionDefinition, ConditionReason, ConditionStatus, Converged, Plan,
    Provider,
};
use crate::observability::{ControllerMetrics, EventSink, Severity};
use crate::store::merge::apply_merge_patch;
use crate::store::ResourceStore;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::Resource;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const KIND: &str = "cloud-resource";

pub const CONFIGURATION_KEY: &str = "configuration";
pub const REVISION_KEY: &str = "revision";
pub const VERSION_KEY: &str = "version";
pub const PLAN_RESULT_KEY: &str = "plan.result";
pub const APPLY_RESULT_KEY: &str = "apply.result";

/// Event reason recorded when the workspace configuration is created or changed
pub const CONFIGURATION_PATCHED_REASON: &str = "ConfigurationPatched";

const CONDITIONS: &[ConditionDefinition] = &[
    ConditionDefinition::new(CONDITION_READY),
    ConditionDefinition::new(CONDITION_PLAN),
    ConditionDefinition::new(CONDITION_APPLY),
];

pub fn workspace_name(resource_name: &str) -> String {
    format!("{resource_name}-workspace")
}

/// Progress reported by the executor for one phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    Pending,
    Running,
    Succeeded,
    Failed(String),
}

impl ExecutionResult {
    /// Missing or unrecognised values count as pending
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim) else {
            return ExecutionResult::Pending;
        };
        match raw {
            "Running" => ExecutionResult::Running,
            "Succeeded" => ExecutionResult::Succeeded,
            "Failed" => ExecutionResult::Failed("no details reported".to_string()),
            _ => match raw.strip_prefix("Failed:") {
                Some(message) => ExecutionResult::Failed(message.trim().to_string()),
                None => ExecutionResult::Pending,
            },
        }
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionResult::Pending => f.write_str("Pending"),
            ExecutionResult::Running => f.write_str("Running"),
            ExecutionResult::Succeeded => f.write_str("Succeeded"),
            ExecutionResult::Failed(message) => write!(f, "Failed: {message}"),
        }
    }
}

/// Revision configuration with the resource parameters merged over it
pub fn render_configuration(
    template: &serde_json::Value,
    parameters: &serde_json::Value,
) -> serde_json::Value {
    let mut rendered = template.clone();
    let has_parameters = parameters.as_object().is_some_and(|p| !p.is_empty());
    if has_parameters {
        apply_merge_patch(&mut rendered, parameters);
    }
    rendered
}

/// Everything the controller owns in a workspace
#[derive(Debug, Clone)]
struct WorkspaceInputs {
    owner: String,
    generation: i64,
    drift_requested_at: Option<String>,
    configuration: String,
    revision: String,
    version: String,
}

impl WorkspaceInputs {
    fn apply(&self, workspace: &mut ConfigMap) {
        workspace
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(WORKSPACE_OWNER_LABEL.to_string(), self.owner.clone());

        let annotations = workspace
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new);
        annotations.insert(
            WORKSPACE_GENERATION_ANNOTATION.to_string(),
            self.generation.to_string(),
        );
        if let Some(at) = &self.drift_requested_at {
            annotations.insert(DRIFT_REQUESTED_ANNOTATION.to_string(), at.clone());
        } else {
            annotations.remove(DRIFT_REQUESTED_ANNOTATION);
        }

        let data = workspace.data.get_or_insert_with(BTreeMap::new);
        data.insert(CONFIGURATION_KEY.to_string(), self.configuration.clone());
        data.insert(REVISION_KEY.to_string(), self.revision.clone());
        data.insert(VERSION_KEY.to_string(), self.version.clone());
    }
}

/// New inputs invalidate whatever the executor reported before
fn reset_results(workspace: &mut ConfigMap) {
    let data = workspace.data.get_or_insert_with(BTreeMap::new);
    for key in [PLAN_RESULT_KEY, APPLY_RESULT_KEY] {
        data.insert(key.to_string(), ExecutionResult::Pending.to_string());
    }
}

/// Delete the workspace and release the finalizer once deletion is safe
pub struct CleanupOnDeletion {
    finalizer: Finalizer,
    store: Arc<dyn ResourceStore<CloudResource>>,
    workspaces: Arc<dyn ResourceStore<ConfigMap>>,
}

#[async_trait]
impl Step<CloudResource> for CleanupOnDeletion {
    fn name(&self) -> &'static str {
        "cleanup_on_deletion"
    }

    async fn run(&self, ctx: &mut StepContext<CloudResource>) -> Result<Outcome, ReconcileError> {
        if !ctx.resource.is_being_deleted() {
            return Ok(Outcome::Continue);
        }
        if !self.finalizer.is_deletion_candidate(&ctx.resource) {
            debug!("foreign finalizers present, leaving deletion alone");
            return Ok(Outcome::Stop);
        }

        ctx.conditions()
            .deleting(CONDITION_READY, "Deleting workspace");
        let namespace = ctx.resource.namespace_or_default().to_string();
        let workspace = workspace_name(ctx.resource.name_or_unknown());
        match self.workspaces.delete(&namespace, &workspace).await {
            Ok(()) => info!(workspace = %workspace, "workspace.deleted"),
            Err(e) if e.is_not_found() => debug!(workspace = %workspace, "workspace already gone"),
            Err(e) => return Err(e.into()),
        }

        ctx.conditions().transition(
            CONDITION_READY,
            ConditionStatus::False,
            ConditionReason::Deleted,
            "Workspace deleted",
            None,
        );
        self.finalizer
            .ensure_removed(self.store.as_ref(), &mut ctx.resource)
            .await?;
        Ok(Outcome::Stop)
    }
}

/// Wait for the referenced Provider to be ready
pub struct ResolveProvider {
    providers: Arc<dyn ResourceStore<Provider>>,
    poll_interval: Duration,
}

#[async_trait]
impl Step<CloudResource> for ResolveProvider {
    fn name(&self) -> &'static str {
        "resolve_provider"
    }

    async fn run(&self, ctx: &mut StepContext<CloudResource>) -> Result<Outcome, ReconcileError> {
        let name = ctx.resource.spec.provider_ref.name.clone();
        let namespace = ctx.resource.namespace_or_default().to_string();
        let Some(provider) = self.providers.get(&namespace, &name).await? else {
            return Ok(require_action(
                ctx,
                CONDITION_READY,
                format!("Provider {name} not found"),
            ));
        };
        let ready = provider
            .convergence()
            .is_some_and(|s| s.is_complete(CONDITION_READY, provider.generation_or_zero()));
        if !ready {
            ctx.conditions().warning(
                CONDITION_READY,
                format!("Waiting for Provider {name} to become ready"),
            );
            return Ok(Outcome::Requeue(self.poll_interval));
        }
        Ok(Outcome::Continue)
    }
}

/// Render the latest plan revision into the workspace ConfigMap
pub struct RenderWorkspace {
    plans: Arc<dyn ResourceStore<Plan>>,
    workspaces: Arc<dyn ResourceStore<ConfigMap>>,
    events: Arc<dyn EventSink>,
}

impl RenderWorkspace {
    async fn inputs(
        &self,
        ctx: &StepContext<CloudResource>,
    ) -> Result<Result<WorkspaceInputs, String>, ReconcileError> {
        let resource = &ctx.resource;
        let plan_name = &resource.spec.plan_ref.name;
        let Some(plan) = self
            .plans
            .get(resource.namespace_or_default(), plan_name)
            .await?
        else {
            return Ok(Err(format!("Plan {plan_name} not found")));
        };
        let Some(revision) = plan.latest() else {
            return Ok(Err(format!("Plan {plan_name} has no latest revision")));
        };
        let configuration =
            render_configuration(&revision.configuration, &resource.spec.parameters);
        Ok(Ok(WorkspaceInputs {
            owner: resource.name_or_unknown().to_string(),
            generation: ctx.generation(),
            drift_requested_at: resource
                .annotation(DRIFT_REQUESTED_ANNOTATION)
                .map(str::to_string),
            configuration: serde_json::to_string(&configuration)?,
            revision: revision.name.clone(),
            version: revision.version.clone(),
        }))
    }
}

#[async_trait]
impl Step<CloudResource> for RenderWorkspace {
    fn name(&self) -> &'static str {
        "render_workspace"
    }

    async fn run(&self, ctx: &mut StepContext<CloudResource>) -> Result<Outcome, ReconcileError> {
        let inputs = match self.inputs(ctx).await? {
            Ok(inputs) => inputs,
            Err(message) => return Ok(require_action(ctx, CONDITION_PLAN, message)),
        };
        let namespace = ctx.resource.namespace_or_default().to_string();
        let name = workspace_name(ctx.resource.name_or_unknown());

        let message = match self.workspaces.get(&namespace, &name).await? {
            None => {
                let mut workspace = ConfigMap {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(namespace),
                        owner_references: ctx.resource.controller_owner_ref(&()).map(|o| vec![o]),
                        ..ObjectMeta::default()
                    },
                    ..ConfigMap::default()
                };
                inputs.apply(&mut workspace);
                reset_results(&mut workspace);
                self.workspaces.create(&workspace).await?;
                format!("Created workspace {name} for revision {}", inputs.revision)
            }
            Some(existing) => {
                let mut workspace = existing.clone();
                inputs.apply(&mut workspace);
                if workspace == existing {
                    return Ok(Outcome::Continue);
                }
                reset_results(&mut workspace);
                self.workspaces.patch_from(&workspace, &existing).await?;
                format!("Patched workspace {name} for revision {}", inputs.revision)
            }
        };

        info!(workspace = %name, revision = %inputs.revision, "workspace.synced");
        let object = ctx.resource.object_ref(&());
        self.events
            .record(&object, Severity::Normal, CONFIGURATION_PATCHED_REASON, &message)
            .await;
        Ok(Outcome::Continue)
    }
}

/// Mirror executor results into the Plan and Apply conditions
pub struct ObserveExecution {
    workspaces: Arc<dyn ResourceStore<ConfigMap>>,
    poll_interval: Duration,
}

#[async_trait]
impl Step<CloudResource> for ObserveExecution {
    fn name(&self) -> &'static str {
        "observe_execution"
    }

    async fn run(&self, ctx: &mut StepContext<CloudResource>) -> Result<Outcome, ReconcileError> {
        let namespace = ctx.resource.namespace_or_default().to_string();
        let name = workspace_name(ctx.resource.name_or_unknown());
        let Some(workspace) = self.workspaces.get(&namespace, &name).await? else {
            ctx.conditions()
                .in_progress(CONDITION_PLAN, "Waiting for the workspace to be created");
            return Ok(Outcome::Requeue(self.poll_interval));
        };

        let generation = ctx.generation();
        let observed = workspace
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(WORKSPACE_OBSERVED_GENERATION_ANNOTATION))
            .and_then(|g| g.trim().parse::<i64>().ok());
        if observed != Some(generation) {
            ctx.conditions().in_progress(
                CONDITION_PLAN,
                format!("Waiting for the executor to pick up generation {generation}"),
            );
            return Ok(Outcome::Requeue(self.poll_interval));
        }

        let data = workspace.data.unwrap_or_default();
        for (condition, key) in [
            (CONDITION_PLAN, PLAN_RESULT_KEY),
            (CONDITION_APPLY, APPLY_RESULT_KEY),
        ] {
            match ExecutionResult::parse(data.get(key).map(String::as_str)) {
                ExecutionResult::Succeeded => {
                    ctx.conditions()
                        .success(condition, format!("{condition} succeeded"));
                }
                ExecutionResult::Failed(reason) => {
                    let error = anyhow::anyhow!("{condition} failed: {reason}");
                    ctx.conditions()
                        .failed(condition, &error, format!("{condition} failed"));
                    return Err(ReconcileError::Failed(error));
                }
                pending => {
                    ctx.conditions()
                        .in_progress(condition, format!("{condition} is {pending}"));
                    return Ok(Outcome::Requeue(self.poll_interval));
                }
            }
        }

        let status = ctx.resource.status.get_or_insert_with(Default::default);
        status.applied_revision = data.get(REVISION_KEY).cloned();
        status.applied_version = data.get(VERSION_KEY).cloned();
        Ok(Outcome::Continue)
    }
}

pub struct CloudResourceReconciler {
    runner: Runner<CloudResource>,
    register: RegisterConditions,
    cleanup: CleanupOnDeletion,
    finalizer: EnsureFinalizer<CloudResource>,
    provider: ResolveProvider,
    render: RenderWorkspace,
    observe: ObserveExecution,
}

impl std::fmt::Debug for CloudResourceReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudResourceReconciler")
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

/// Stores the CloudResource chain reads and writes
#[derive(Clone)]
pub struct CloudResourceStores {
    pub cloud_resources: Arc<dyn ResourceStore<CloudResource>>,
    pub providers: Arc<dyn ResourceStore<Provider>>,
    pub plans: Arc<dyn ResourceStore<Plan>>,
    pub workspaces: Arc<dyn ResourceStore<ConfigMap>>,
}

impl CloudResourceReconciler {
    pub fn new(
        stores: CloudResourceStores,
        events: Arc<dyn EventSink>,
        metrics: Arc<ControllerMetrics>,
        config: &ControllerConfig,
    ) -> Self {
        let finalizer = Finalizer::default();
        let options = RunnerOptions {
            conflict_requeue: config.conflict_requeue,
            ready_message: "CloudResource is applied".to_string(),
            ..RunnerOptions::default()
        };
        let poll_interval = config.dependency_poll_interval;
        Self {
            runner: Runner::new(KIND, Arc::clone(&stores.cloud_resources), metrics)
                .with_options(options),
            register: RegisterConditions::new(CONDITIONS),
            cleanup: CleanupOnDeletion {
                finalizer: finalizer.clone(),
                store: Arc::clone(&stores.cloud_resources),
                workspaces: Arc::clone(&stores.workspaces),
            },
            finalizer: EnsureFinalizer::new(finalizer, stores.cloud_resources),
            provider: ResolveProvider {
                providers: stores.providers,
                poll_interval,
            },
            render: RenderWorkspace {
                plans: stores.plans,
                workspaces: Arc::clone(&stores.workspaces),
                events,
            },
            observe: ObserveExecution {
                workspaces: stores.workspaces,
                poll_interval,
            },
        }
    }
}

#[async_trait]
impl Reconcile<CloudResource> for CloudResourceReconciler {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn reconcile(&self, resource: CloudResource, cancel: &CancellationToken) -> RunResult {
        let steps: [&dyn Step<CloudResource>; 6] = [
            &self.register,
            &self.cleanup,
            &self.finalizer,
            &self.provider,
            &self.render,
            &self.observe,
        ];
        self.runner.run(resource, &steps, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_execution_result_parsing() {
        assert_eq!(ExecutionResult::parse(None), ExecutionResult::Pending);
        assert_eq!(ExecutionResult::parse(Some("Running")), ExecutionResult::Running);
        assert_eq!(
            ExecutionResult::parse(Some(" Succeeded ")),
            ExecutionResult::Succeeded
        );
        assert_eq!(
            ExecutionResult::parse(Some("Failed: quota exceeded")),
            ExecutionResult::Failed("quota exceeded".to_string())
        );
        assert_eq!(ExecutionResult::parse(Some("garbage")), ExecutionResult::Pending);
    }

    #[test]
    fn test_parameters_override_template() {
        let template = json!({"engine": "postgres", "size": {"cpu": 1, "memory": "1Gi"}});
        let parameters = json!({"size": {"cpu": 4}, "engine": null});
        assert_eq!(
            render_configuration(&template, &parameters),
            json!({"size": {"cpu": 4, "memory": "1Gi"}})
        );
        assert_eq!(render_configuration(&template, &json!(null)), template);
    }
}

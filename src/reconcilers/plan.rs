//! # Plan Reconciler
//!
//! Publishes the latest revision of a Plan in its status and holds deletion
//! while CloudResources still reference it.

use super::common::{
    plan_reference, require_action, EnsureFinalizer, RegisterConditions, ReleaseWhenUnreferenced,
};
use super::Reconcile;
use crate::config::ControllerConfig;
use crate::constants::{CONDITION_READY, CONDITION_REVISION};
use crate::controller::revision::select_latest;
use crate::controller::{
    Finalizer, Outcome, ReconcileError, RunResult, Runner, RunnerOptions, Step, StepContext,
};
use crate::crd::{CloudResource, ConditionDefinition, Plan};
use crate::observability::ControllerMetrics;
use crate::store::ResourceStore;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const KIND: &str = "plan";

const CONDITIONS: &[ConditionDefinition] = &[
    ConditionDefinition::new(CONDITION_READY),
    ConditionDefinition::new(CONDITION_REVISION),
];

/// Select the latest revision and publish it in status
#[derive(Debug, Clone, Copy)]
pub struct SelectLatestRevision;

#[async_trait]
impl Step<Plan> for SelectLatestRevision {
    fn name(&self) -> &'static str {
        "select_latest_revision"
    }

    async fn run(&self, ctx: &mut StepContext<Plan>) -> Result<Outcome, ReconcileError> {
        let selected = select_latest(&ctx.resource.spec.revisions)
            .map(|r| (r.name.clone(), r.version.clone()));
        match selected {
            Ok((name, version)) => {
                let message = format!("Latest revision is {name} ({version})");
                let status = ctx.resource.status.get_or_insert_with(Default::default);
                status.latest_revision = Some(name);
                status.latest_version = Some(version);
                ctx.conditions().success(CONDITION_REVISION, message);
                Ok(Outcome::Continue)
            }
            Err(e) => {
                warn!(error = %e, "revision.selection_failed");
                // Dependents must not keep rendering a revision that was published before
                if let Some(status) = ctx.resource.status.as_mut() {
                    status.latest_revision = None;
                    status.latest_version = None;
                }
                Ok(require_action(ctx, CONDITION_REVISION, e.to_string()))
            }
        }
    }
}

pub struct PlanReconciler {
    runner: Runner<Plan>,
    register: RegisterConditions,
    release: ReleaseWhenUnreferenced<Plan>,
    finalizer: EnsureFinalizer<Plan>,
    select: SelectLatestRevision,
}

impl std::fmt::Debug for PlanReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanReconciler")
            .field("runner", &self.runner)
            .finish_non_exhaustive()
    }
}

impl PlanReconciler {
    pub fn new(
        plans: Arc<dyn ResourceStore<Plan>>,
        cloud_resources: Arc<dyn ResourceStore<CloudResource>>,
        metrics: Arc<ControllerMetrics>,
        config: &ControllerConfig,
    ) -> Self {
        let finalizer = Finalizer::default();
        let options = RunnerOptions {
            conflict_requeue: config.conflict_requeue,
            ready_message: "Plan is ready".to_string(),
            ..RunnerOptions::default()
        };
        Self {
            runner: Runner::new(KIND, Arc::clone(&plans), metrics).with_options(options),
            register: RegisterConditions::new(CONDITIONS),
            release: ReleaseWhenUnreferenced::new(
                finalizer.clone(),
                Arc::clone(&plans),
                cloud_resources,
                plan_reference,
                config.dependency_poll_interval,
            ),
            finalizer: EnsureFinalizer::new(finalizer, plans),
            select: SelectLatestRevision,
        }
    }
}

#[async_trait]
impl Reconcile<Plan> for PlanReconciler {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn reconcile(&self, plan: Plan, cancel: &CancellationToken) -> RunResult {
        let steps: [&dyn Step<Plan>; 4] = [
            &self.register,
            &self.release,
            &self.finalizer,
            &self.select,
        ];
        self.runner.run(plan, &steps, cancel).await
    }
}

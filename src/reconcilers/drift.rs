//! # Drift Reconciler
//!
//! Periodically asks the drift admission gates whether a CloudResource should
//! be re-validated. On trigger it stamps the drift marker annotation, which the
//! CloudResource reconciler carries into the workspace so the executor runs a
//! fresh plan. Conditions are owned by the CloudResource reconciler; this
//! chain never touches Ready.

use super::Reconcile;
use crate::config::ControllerConfig;
use crate::constants::DRIFT_REQUESTED_ANNOTATION;
use crate::controller::drift::{evaluate, DriftDecision, DriftPolicy, DriftSubject, FleetSnapshot};
use crate::controller::{
    Outcome, ReconcileError, RunResult, Runner, RunnerOptions, Step, StepContext,
};
use crate::crd::{CloudResource, Converged};
use crate::observability::{ControllerMetrics, EventSink, Severity};
use crate::store::ResourceStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::Resource;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const KIND: &str = "drift";

/// Event reason recorded when a drift check is triggered
pub const DRIFT_TRIGGERED_REASON: &str = "DriftCheckTriggered";

/// When the drift marker was stamped; unparsable markers are ignored
pub fn drift_requested_at(resource: &CloudResource) -> Option<DateTime<Utc>> {
    resource
        .annotation(DRIFT_REQUESTED_ANNOTATION)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc))
}

pub fn drift_subject(resource: &CloudResource) -> DriftSubject<'_> {
    DriftSubject {
        enabled: resource.spec.drift_detection.enabled,
        deleting: resource.is_being_deleted(),
        generation: resource.generation_or_zero(),
        status: resource.convergence(),
        requested_at: drift_requested_at(resource),
    }
}

pub struct EvaluateDrift {
    resources: Arc<dyn ResourceStore<CloudResource>>,
    events: Arc<dyn EventSink>,
    metrics: Arc<ControllerMetrics>,
    policy: DriftPolicy,
}

#[async_trait]
impl Step<CloudResource> for EvaluateDrift {
    fn name(&self) -> &'static str {
        "evaluate_drift"
    }

    async fn run(&self, ctx: &mut StepContext<CloudResource>) -> Result<Outcome, ReconcileError> {
        let fleet = {
            let all = self.resources.list(None, None).await?;
            FleetSnapshot::from_subjects(all.iter().map(drift_subject), &self.policy)
        };
        let now = Utc::now();
        let decision = evaluate(&drift_subject(&ctx.resource), &fleet, &self.policy, now);

        match decision {
            DriftDecision::Skip { gate, recheck_after } => {
                debug!(
                    gate = %gate,
                    fleet.total = fleet.total,
                    fleet.in_drift_check = fleet.in_drift_check,
                    "drift.skipped"
                );
                Ok(Outcome::Requeue(recheck_after))
            }
            DriftDecision::Trigger { recheck_after } => {
                let stamp = now.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
                let mut annotations = serde_json::Map::new();
                annotations.insert(DRIFT_REQUESTED_ANNOTATION.to_string(), stamp.clone().into());
                let patch = serde_json::json!({ "metadata": { "annotations": annotations } });
                let updated = self.resources.patch(&ctx.resource, &patch).await?;
                *ctx.resource.meta_mut() = updated.meta().clone();

                info!(
                    fleet.total = fleet.total,
                    fleet.in_drift_check = fleet.in_drift_check,
                    "drift.triggered"
                );
                self.metrics.increment_drift_checks_triggered();
                let object = ctx.resource.object_ref(&());
                self.events
                    .record(
                        &object,
                        Severity::Normal,
                        DRIFT_TRIGGERED_REASON,
                        &format!("Drift check requested at {stamp}"),
                    )
                    .await;
                Ok(Outcome::Requeue(recheck_after))
            }
        }
    }
}

pub struct DriftReconciler {
    runner: Runner<CloudResource>,
    evaluate: EvaluateDrift,
}

impl std::fmt::Debug for DriftReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriftReconciler")
            .field("runner", &self.runner)
            .field("policy", &self.evaluate.policy)
            .finish_non_exhaustive()
    }
}

impl DriftReconciler {
    pub fn new(
        resources: Arc<dyn ResourceStore<CloudResource>>,
        events: Arc<dyn EventSink>,
        metrics: Arc<ControllerMetrics>,
        config: &ControllerConfig,
    ) -> Self {
        let options = RunnerOptions {
            conflict_requeue: config.conflict_requeue,
            ready_condition: None,
            ..RunnerOptions::default()
        };
        Self {
            runner: Runner::new(KIND, Arc::clone(&resources), Arc::clone(&metrics))
                .with_options(options),
            evaluate: EvaluateDrift {
                resources,
                events,
                metrics,
                policy: config.drift_policy(),
            },
        }
    }
}

#[async_trait]
impl Reconcile<CloudResource> for DriftReconciler {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn reconcile(&self, resource: CloudResource, cancel: &CancellationToken) -> RunResult {
        let steps: [&dyn Step<CloudResource>; 1] = [&self.evaluate];
        self.runner.run(resource, &steps, cancel).await
    }
}

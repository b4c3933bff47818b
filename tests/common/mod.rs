//! Shared fixtures for the integration tests

#![allow(dead_code, reason = "Each test binary uses a different subset of fixtures")]

use chrono::{TimeDelta, Utc};
use convergence_controller::config::ControllerConfig;
use convergence_controller::constants::{CONDITION_APPLY, CONDITION_PLAN, CONDITION_READY};
use convergence_controller::controller::RunResult;
use convergence_controller::crd::{
    CloudResource, CloudResourceSpec, CloudResourceStatus, Condition, ConditionReason,
    ConditionStatus, Converged, ConvergenceStatus, DriftDetection, LocalRef, Plan, PlanRevision,
    PlanSpec, PlanStatus, Provider, ProviderSpec, ProviderStatus, SecretKeyRef,
};
use convergence_controller::observability::ControllerMetrics;
use convergence_controller::reconcilers::Reconcile;
use convergence_controller::store::MemoryStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const NAMESPACE: &str = "default";

pub fn metrics() -> Arc<ControllerMetrics> {
    Arc::new(ControllerMetrics::unregistered())
}

pub fn config() -> ControllerConfig {
    ControllerConfig::default()
}

pub fn condition(
    r#type: &str,
    status: ConditionStatus,
    reason: ConditionReason,
    generation: i64,
    age: TimeDelta,
) -> Condition {
    Condition {
        r#type: r#type.to_string(),
        status,
        observed_generation: generation,
        last_transition_time: Utc::now() - age,
        reason,
        message: String::new(),
        name: r#type.to_string(),
        detail: None,
    }
}

pub fn ready(r#type: &str, generation: i64, age: TimeDelta) -> Condition {
    condition(r#type, ConditionStatus::True, ConditionReason::Ready, generation, age)
}

pub fn revision(name: &str, version: &str) -> PlanRevision {
    PlanRevision {
        name: name.to_string(),
        version: version.to_string(),
        configuration: serde_json::json!({ "engine": "postgres", "size": "small" }),
    }
}

pub fn plan(name: &str, revisions: Vec<PlanRevision>) -> Plan {
    let mut plan = Plan::new(name, PlanSpec { revisions });
    plan.metadata.namespace = Some(NAMESPACE.to_string());
    plan
}

/// A plan whose latest revision has already been published
pub fn published_plan(name: &str, latest: PlanRevision) -> Plan {
    let mut plan = plan(name, vec![latest.clone()]);
    plan.status = Some(PlanStatus {
        convergence: ConvergenceStatus::default(),
        latest_revision: Some(latest.name),
        latest_version: Some(latest.version),
    });
    plan
}

pub fn provider(name: &str, r#type: &str, secret: Option<(&str, &str)>) -> Provider {
    let mut provider = Provider::new(
        name,
        ProviderSpec {
            r#type: r#type.to_string(),
            region: Some("eu-west-1".to_string()),
            credentials_secret_ref: secret.map(|(name, key)| SecretKeyRef {
                name: name.to_string(),
                key: key.to_string(),
            }),
        },
    );
    provider.metadata.namespace = Some(NAMESPACE.to_string());
    provider
}

pub fn ready_provider(name: &str) -> Provider {
    let mut provider = provider(name, "aws", None);
    provider.status = Some(ProviderStatus {
        convergence: ConvergenceStatus {
            conditions: vec![ready(CONDITION_READY, 1, TimeDelta::minutes(10))],
            ..ConvergenceStatus::default()
        },
    });
    provider
}

pub fn cloud_resource(name: &str, provider: &str, plan: &str) -> CloudResource {
    let mut resource = CloudResource::new(
        name,
        CloudResourceSpec {
            provider_ref: LocalRef {
                name: provider.to_string(),
            },
            plan_ref: LocalRef {
                name: plan.to_string(),
            },
            parameters: serde_json::json!({ "size": "large" }),
            drift_detection: DriftDetection { enabled: true },
        },
    );
    resource.metadata.namespace = Some(NAMESPACE.to_string());
    resource
}

/// A drift-enabled CloudResource whose Plan and Apply settled `age` ago
pub fn settled_resource(name: &str, age: TimeDelta) -> CloudResource {
    let mut resource = cloud_resource(name, "aws", "postgres");
    resource.metadata.generation = Some(1);
    resource.status = Some(CloudResourceStatus {
        convergence: ConvergenceStatus {
            conditions: vec![
                ready(CONDITION_READY, 1, age),
                ready(CONDITION_PLAN, 1, age),
                ready(CONDITION_APPLY, 1, age),
            ],
            ..ConvergenceStatus::default()
        },
        ..CloudResourceStatus::default()
    });
    resource
}

pub fn with_annotation<K: Converged>(mut resource: K, key: &str, value: &str) -> K {
    resource
        .meta_mut()
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    resource
}

/// Re-run `reconciler` against the stored copy until it stops asking for the
/// immediate requeue that follows a metadata write
pub async fn converge<K, R>(reconciler: &R, store: &MemoryStore<K>, name: &str) -> RunResult
where
    K: Converged,
    R: Reconcile<K>,
{
    let cancel = CancellationToken::new();
    let immediate = Duration::from_millis(convergence_controller::constants::IMMEDIATE_REQUEUE_MS);
    let mut result = Ok(None);
    for _ in 0..5 {
        let Some(current) = store.snapshot(NAMESPACE, name) else {
            return result;
        };
        result = reconciler.reconcile(current, &cancel).await;
        if !matches!(result, Ok(Some(after)) if after == immediate) {
            break;
        }
    }
    result
}

//! # Drift Reconciler Tests
//!
//! Drift admission over a fleet of CloudResources held in a [`MemoryStore`]:
//! - quiet period since the last Plan/Apply transition
//! - fleet-wide saturation limit
//! - marker annotation, event and metric on trigger

mod common;

use chrono::{TimeDelta, Utc};
use common::{config, metrics, settled_resource, with_annotation, NAMESPACE};
use convergence_controller::constants::{CONDITION_PLAN, DRIFT_REQUESTED_ANNOTATION};
use convergence_controller::crd::{CloudResource, ConditionReason, ConditionStatus, Converged};
use convergence_controller::observability::{ControllerMetrics, MemoryEventSink};
use convergence_controller::reconcilers::drift::{drift_requested_at, DRIFT_TRIGGERED_REASON};
use convergence_controller::reconcilers::{DriftReconciler, Reconcile};
use convergence_controller::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct Fixture {
    store: Arc<MemoryStore<CloudResource>>,
    events: Arc<MemoryEventSink>,
    metrics: Arc<ControllerMetrics>,
    reconciler: DriftReconciler,
}

fn fixture() -> Fixture {
    let store: Arc<MemoryStore<CloudResource>> = Arc::new(MemoryStore::new());
    let events = Arc::new(MemoryEventSink::new());
    let metrics = metrics();
    let reconciler = DriftReconciler::new(
        store.clone(),
        events.clone(),
        Arc::clone(&metrics),
        &config(),
    );
    Fixture {
        store,
        events,
        metrics,
        reconciler,
    }
}

/// Seed `settled` quiet resources and `mid_check` resources whose drift
/// marker is newer than their last Plan transition
fn seed_fleet(store: &MemoryStore<CloudResource>, settled: usize, mid_check: usize) {
    let marker = Utc::now().to_rfc3339();
    for i in 0..settled {
        store
            .insert(settled_resource(&format!("quiet-{i}"), TimeDelta::hours(5)))
            .unwrap();
    }
    for i in 0..mid_check {
        let resource = settled_resource(&format!("checking-{i}"), TimeDelta::hours(5));
        store
            .insert(with_annotation(resource, DRIFT_REQUESTED_ANNOTATION, &marker))
            .unwrap();
    }
}

async fn reconcile(fixture: &Fixture, name: &str) -> Option<Duration> {
    let resource = fixture.store.snapshot(NAMESPACE, name).unwrap();
    fixture
        .reconciler
        .reconcile(resource, &CancellationToken::new())
        .await
        .unwrap()
}

fn marker(fixture: &Fixture, name: &str) -> Option<String> {
    fixture
        .store
        .snapshot(NAMESPACE, name)
        .and_then(|r| r.annotation(DRIFT_REQUESTED_ANNOTATION).map(str::to_string))
}

#[tokio::test]
async fn test_recent_transition_defers_drift_check() {
    let fixture = fixture();
    fixture
        .store
        .insert(settled_resource("target", TimeDelta::hours(1)))
        .unwrap();

    let requeue = reconcile(&fixture, "target").await;

    assert_eq!(requeue, Some(CHECK_INTERVAL));
    assert_eq!(marker(&fixture, "target"), None);
    assert!(fixture.events.events().is_empty());
    assert_eq!(fixture.metrics.drift_checks_triggered(), 0);
}

#[tokio::test]
async fn test_quiet_resource_in_calm_fleet_is_triggered() {
    let fixture = fixture();
    fixture
        .store
        .insert(settled_resource("target", TimeDelta::hours(5)))
        .unwrap();
    seed_fleet(&fixture.store, 8, 1);

    let before = Utc::now() - TimeDelta::seconds(1);
    let requeue = reconcile(&fixture, "target").await;

    assert_eq!(requeue, Some(CHECK_INTERVAL));
    let stored = fixture.store.snapshot(NAMESPACE, "target").unwrap();
    let requested_at = drift_requested_at(&stored).unwrap();
    assert!(requested_at >= before);

    let triggered = fixture.events.with_reason(DRIFT_TRIGGERED_REASON);
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0].object.name.as_deref(), Some("target"));
    assert_eq!(fixture.metrics.drift_checks_triggered(), 1);
}

#[tokio::test]
async fn test_saturated_fleet_blocks_new_checks() {
    let fixture = fixture();
    fixture
        .store
        .insert(settled_resource("target", TimeDelta::hours(5)))
        .unwrap();
    // 2 of 10 mid-check reaches the default 0.2 threshold
    seed_fleet(&fixture.store, 7, 2);

    let requeue = reconcile(&fixture, "target").await;

    assert_eq!(requeue, Some(CHECK_INTERVAL));
    assert_eq!(marker(&fixture, "target"), None);
    assert!(fixture.events.events().is_empty());
}

#[tokio::test]
async fn test_disabled_resource_is_never_triggered() {
    let fixture = fixture();
    let mut resource = settled_resource("target", TimeDelta::hours(5));
    resource.spec.drift_detection.enabled = false;
    fixture.store.insert(resource).unwrap();

    reconcile(&fixture, "target").await;

    assert_eq!(marker(&fixture, "target"), None);
}

#[tokio::test]
async fn test_failed_plan_is_not_drift_checked() {
    let fixture = fixture();
    let mut resource = settled_resource("target", TimeDelta::hours(5));
    let status = resource.convergence_mut();
    let plan = status
        .conditions
        .iter_mut()
        .find(|c| c.r#type == CONDITION_PLAN)
        .unwrap();
    plan.status = ConditionStatus::False;
    plan.reason = ConditionReason::Error;
    fixture.store.insert(resource).unwrap();

    reconcile(&fixture, "target").await;

    assert_eq!(marker(&fixture, "target"), None);
}

#[tokio::test]
async fn test_drift_run_leaves_ready_alone() {
    let fixture = fixture();
    let mut resource = settled_resource("target", TimeDelta::hours(1));
    resource.convergence_mut().conditions.retain(|c| c.r#type != "Ready");
    fixture.store.insert(resource).unwrap();

    reconcile(&fixture, "target").await;

    let stored = fixture.store.snapshot(NAMESPACE, "target").unwrap();
    let status = stored.convergence().unwrap();
    assert!(status.condition("Ready").is_none());
    assert!(status.last_reconcile.is_some());
}

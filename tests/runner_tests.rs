//! # Convergence Runner Tests
//!
//! Step chains run against a [`MemoryStore`] to verify:
//! - ordering and early exit on requeue, stop and error
//! - the single status patch per run
//! - conflict and not-found handling
//! - cancellation and panic recovery

mod common;

use common::{metrics, plan, NAMESPACE};
use convergence_controller::constants::{CONDITION_PLAN, CONDITION_READY};
use convergence_controller::controller::{
    Outcome, ReconcileError, Runner, RunnerOptions, Step, StepContext,
};
use convergence_controller::crd::{ConditionStatus, Plan};
use convergence_controller::store::memory::{InjectedFailure, Operation};
use convergence_controller::store::{MemoryStore, StoreError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Marks a condition successful, then returns a fixed outcome
struct Mark {
    condition: &'static str,
    outcome: Outcome,
    runs: AtomicUsize,
}

impl Mark {
    fn new(condition: &'static str, outcome: Outcome) -> Self {
        Self {
            condition,
            outcome,
            runs: AtomicUsize::new(0),
        }
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Step<Plan> for Mark {
    fn name(&self) -> &'static str {
        "mark"
    }

    async fn run(&self, ctx: &mut StepContext<Plan>) -> Result<Outcome, ReconcileError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        ctx.conditions().success(self.condition, "marked");
        Ok(self.outcome)
    }
}

/// Returns a fixed outcome without touching the resource
struct Fixed(Outcome);

#[async_trait::async_trait]
impl Step<Plan> for Fixed {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn run(&self, _ctx: &mut StepContext<Plan>) -> Result<Outcome, ReconcileError> {
        Ok(self.0)
    }
}

struct Fail;

#[async_trait::async_trait]
impl Step<Plan> for Fail {
    fn name(&self) -> &'static str {
        "fail"
    }

    async fn run(&self, _ctx: &mut StepContext<Plan>) -> Result<Outcome, ReconcileError> {
        Err(ReconcileError::Failed(anyhow::anyhow!("backend unavailable")))
    }
}

struct Conflict;

#[async_trait::async_trait]
impl Step<Plan> for Conflict {
    fn name(&self) -> &'static str {
        "conflict"
    }

    async fn run(&self, _ctx: &mut StepContext<Plan>) -> Result<Outcome, ReconcileError> {
        Err(StoreError::Conflict {
            key: "default/p".to_string(),
            message: "stale resource version".to_string(),
        }
        .into())
    }
}

struct Explode;

#[async_trait::async_trait]
impl Step<Plan> for Explode {
    fn name(&self) -> &'static str {
        "explode"
    }

    #[allow(clippy::panic, reason = "Exercises panic recovery in the runner")]
    async fn run(&self, _ctx: &mut StepContext<Plan>) -> Result<Outcome, ReconcileError> {
        panic!("step blew up");
    }
}

/// Cancels the run it is part of and then never finishes
struct CancelAndHang;

#[async_trait::async_trait]
impl Step<Plan> for CancelAndHang {
    fn name(&self) -> &'static str {
        "cancel_and_hang"
    }

    async fn run(&self, ctx: &mut StepContext<Plan>) -> Result<Outcome, ReconcileError> {
        ctx.conditions().success(CONDITION_PLAN, "should never be persisted");
        ctx.cancellation().cancel();
        std::future::pending::<()>().await;
        Ok(Outcome::Continue)
    }
}

fn setup() -> (Arc<MemoryStore<Plan>>, Plan) {
    let store: Arc<MemoryStore<Plan>> = Arc::new(MemoryStore::new());
    let stored = store.insert(plan("p", vec![])).unwrap();
    (store, stored)
}

fn runner(store: &Arc<MemoryStore<Plan>>) -> Runner<Plan> {
    Runner::new("plan", store.clone(), metrics())
}

fn condition_status(store: &MemoryStore<Plan>, r#type: &str) -> Option<ConditionStatus> {
    store
        .snapshot(NAMESPACE, "p")?
        .status?
        .convergence
        .condition(r#type)
        .map(|c| c.status)
}

#[tokio::test]
async fn test_requeue_stops_chain_and_persists_earlier_changes() {
    let (store, resource) = setup();
    let first = Mark::new(CONDITION_PLAN, Outcome::Continue);
    let second = Fixed(Outcome::Requeue(Duration::from_secs(5)));
    let third = Mark::new("Third", Outcome::Continue);
    let steps: [&dyn Step<Plan>; 3] = [&first, &second, &third];

    let result = runner(&store)
        .run(resource, &steps, &CancellationToken::new())
        .await;

    assert_eq!(result.unwrap(), Some(Duration::from_secs(5)));
    assert_eq!(first.runs(), 1);
    assert_eq!(third.runs(), 0);
    assert_eq!(condition_status(&store, CONDITION_PLAN), Some(ConditionStatus::True));
    assert_eq!(condition_status(&store, "Third"), None);
    assert_eq!(store.calls(Operation::PatchStatus), 1);

    let status = store.snapshot(NAMESPACE, "p").unwrap().status.unwrap();
    assert!(status.convergence.last_reconcile.is_some());
    assert!(status.convergence.last_success.is_none());
}

#[tokio::test]
async fn test_completed_chain_marks_ready() {
    let (store, resource) = setup();
    let first = Mark::new(CONDITION_PLAN, Outcome::Continue);
    let steps: [&dyn Step<Plan>; 2] = [&first, &Fixed(Outcome::Continue)];

    let result = runner(&store)
        .run(resource, &steps, &CancellationToken::new())
        .await;

    assert_eq!(result.unwrap(), None);
    assert_eq!(condition_status(&store, CONDITION_READY), Some(ConditionStatus::True));
    let status = store.snapshot(NAMESPACE, "p").unwrap().status.unwrap();
    let success = status.convergence.last_success.unwrap();
    assert_eq!(success.generation, 1);
    assert_eq!(store.calls(Operation::PatchStatus), 1);
}

#[tokio::test]
async fn test_zero_requeue_continues() {
    let (store, resource) = setup();
    let last = Mark::new(CONDITION_PLAN, Outcome::Continue);
    let steps: [&dyn Step<Plan>; 2] = [&Fixed(Outcome::Requeue(Duration::ZERO)), &last];

    let result = runner(&store)
        .run(resource, &steps, &CancellationToken::new())
        .await;

    assert_eq!(result.unwrap(), None);
    assert_eq!(last.runs(), 1);
}

#[tokio::test]
async fn test_stop_does_not_force_ready() {
    let (store, resource) = setup();
    let first = Mark::new(CONDITION_PLAN, Outcome::Stop);
    let after = Mark::new("After", Outcome::Continue);
    let steps: [&dyn Step<Plan>; 2] = [&first, &after];

    let result = runner(&store)
        .run(resource, &steps, &CancellationToken::new())
        .await;

    assert_eq!(result.unwrap(), None);
    assert_eq!(after.runs(), 0);
    assert_eq!(condition_status(&store, CONDITION_READY), None);
    let status = store.snapshot(NAMESPACE, "p").unwrap().status.unwrap();
    assert!(status.convergence.last_success.is_none());
}

#[tokio::test]
async fn test_ready_condition_can_be_disabled() {
    let (store, resource) = setup();
    let runner = runner(&store).with_options(RunnerOptions {
        ready_condition: None,
        ..RunnerOptions::default()
    });
    let steps: [&dyn Step<Plan>; 1] = [&Fixed(Outcome::Continue)];

    runner
        .run(resource, &steps, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(condition_status(&store, CONDITION_READY), None);
}

#[tokio::test]
async fn test_conflict_becomes_short_requeue() {
    let (store, resource) = setup();
    let metrics = metrics();
    let runner = Runner::new("plan", store.clone(), Arc::clone(&metrics));
    let after = Mark::new(CONDITION_PLAN, Outcome::Continue);
    let steps: [&dyn Step<Plan>; 2] = [&Conflict, &after];

    let result = runner
        .run(resource, &steps, &CancellationToken::new())
        .await;

    assert_eq!(result.unwrap(), Some(Duration::from_millis(5)));
    assert_eq!(after.runs(), 0);
    assert_eq!(metrics.requeues("plan", "conflict"), 1);
    assert_eq!(metrics.reconciliation_errors("plan", "conflict"), 0);
}

#[tokio::test]
async fn test_step_error_propagates_and_status_is_still_persisted() {
    let (store, resource) = setup();
    let metrics = metrics();
    let runner = Runner::new("plan", store.clone(), Arc::clone(&metrics));
    let first = Mark::new(CONDITION_PLAN, Outcome::Continue);
    let after = Mark::new("After", Outcome::Continue);
    let steps: [&dyn Step<Plan>; 3] = [&first, &Fail, &after];

    let err = runner
        .run(resource, &steps, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Failed(_)));
    assert_eq!(after.runs(), 0);
    assert_eq!(condition_status(&store, CONDITION_PLAN), Some(ConditionStatus::True));
    assert_eq!(condition_status(&store, CONDITION_READY), None);
    assert_eq!(store.calls(Operation::PatchStatus), 1);
    assert_eq!(metrics.reconciliation_errors("plan", "failed"), 1);
}

#[tokio::test]
async fn test_step_error_wins_over_patch_error() {
    let (store, resource) = setup();
    store.fail_next(Operation::PatchStatus, InjectedFailure::Backend("down".to_string()));
    let steps: [&dyn Step<Plan>; 1] = [&Fail];

    let err = runner(&store)
        .run(resource, &steps, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Failed(_)));
}

#[tokio::test]
async fn test_patch_error_fails_an_otherwise_successful_run() {
    let (store, resource) = setup();
    store.fail_next(Operation::PatchStatus, InjectedFailure::Backend("down".to_string()));
    let steps: [&dyn Step<Plan>; 1] = [&Fixed(Outcome::Continue)];

    let err = runner(&store)
        .run(resource, &steps, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Store(StoreError::Backend(_))));
}

#[tokio::test]
async fn test_resource_deleted_during_run_is_not_an_error() {
    let (store, resource) = setup();
    store.fail_next(Operation::PatchStatus, InjectedFailure::NotFound);
    let steps: [&dyn Step<Plan>; 1] = [&Mark::new(CONDITION_PLAN, Outcome::Continue)];

    let result = runner(&store)
        .run(resource, &steps, &CancellationToken::new())
        .await;

    assert_eq!(result.unwrap(), None);
}

#[tokio::test]
async fn test_cancelled_run_persists_nothing() {
    let (store, resource) = setup();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let first = Mark::new(CONDITION_PLAN, Outcome::Continue);
    let steps: [&dyn Step<Plan>; 1] = [&first];

    let err = runner(&store).run(resource, &steps, &cancel).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Cancelled));
    assert_eq!(first.runs(), 0);
    assert_eq!(store.calls(Operation::PatchStatus), 0);
}

#[tokio::test]
async fn test_cancellation_interrupts_a_running_step() {
    let (store, resource) = setup();
    let steps: [&dyn Step<Plan>; 1] = [&CancelAndHang];

    let err = runner(&store)
        .run(resource, &steps, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReconcileError::Cancelled));
    assert_eq!(store.calls(Operation::PatchStatus), 0);
    assert_eq!(condition_status(&store, CONDITION_PLAN), None);
}

#[tokio::test]
async fn test_panicking_step_is_reported_and_status_persisted() {
    let (store, resource) = setup();
    let first = Mark::new(CONDITION_PLAN, Outcome::Continue);
    let steps: [&dyn Step<Plan>; 2] = [&first, &Explode];

    let err = runner(&store)
        .run(resource, &steps, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ReconcileError::StepPanicked { step, message } => {
            assert_eq!(step, "explode");
            assert_eq!(message, "step blew up");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(condition_status(&store, CONDITION_PLAN), Some(ConditionStatus::True));
    assert_eq!(store.calls(Operation::PatchStatus), 1);
}

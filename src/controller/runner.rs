//! # Convergence Runner
//!
//! Executes an ordered chain of idempotent [`Step`]s against one resource and
//! decides between success, requeue and abort.
//!
//! ## Run Lifecycle
//!
//! 1. The resource status is snapshotted and `lastReconcile` is stamped.
//! 2. Steps run strictly in order. The chain stops at the first step that
//!    returns [`Outcome::Stop`], a non-zero [`Outcome::Requeue`], or an error.
//!    Optimistic-concurrency conflicts are swallowed and turned into a short
//!    requeue; panics are caught and reported as errors.
//! 3. When every step continues, the ready condition is set to success and
//!    `lastSuccess` is stamped.
//! 4. The status delta is merge-patched exactly once, on every path except
//!    cancellation.
//!
//! Steps may assume everything before them in the chain succeeded.

use crate::controller::conditions::ConditionManager;
use crate::controller::error::ReconcileError;
use crate::crd::{Converged, ReconcileStamp};
use crate::observability::metrics::ControllerMetrics;
use crate::store::merge::merge_patch_diff;
use crate::store::ResourceStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, warn, Instrument};

/// What a step wants the runner to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Run the next step
    Continue,
    /// Stop cleanly: nothing more to do for this generation, no error, no requeue
    Stop,
    /// Stop and run the chain again after the given interval
    Requeue(Duration),
}

/// Mutable state handed to each step of a run
#[derive(Debug)]
pub struct StepContext<K> {
    /// Working copy of the resource; status changes are persisted at the end of the run
    pub resource: K,
    generation: i64,
    started_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl<K: Converged> StepContext<K> {
    pub fn new(resource: K, cancel: CancellationToken) -> Self {
        let generation = resource.generation_or_zero();
        Self {
            resource,
            generation,
            started_at: Utc::now(),
            cancel,
        }
    }

    /// Condition manager over the working copy
    pub fn conditions(&mut self) -> ConditionManager<'_> {
        ConditionManager::new(self.resource.convergence_mut(), self.generation)
    }

    /// Generation of the resource when the run started
    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// One idempotent unit of convergence work
#[async_trait]
pub trait Step<K: Converged>: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &mut StepContext<K>) -> Result<Outcome, ReconcileError>;
}

/// Tunables for a runner
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Requeue after a swallowed optimistic-concurrency conflict
    pub conflict_requeue: Duration,
    /// Condition set to success when the whole chain completes; `None` leaves conditions alone
    pub ready_condition: Option<String>,
    pub ready_message: String,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            conflict_requeue: Duration::from_millis(crate::constants::DEFAULT_CONFLICT_REQUEUE_MS),
            ready_condition: Some(crate::constants::CONDITION_READY.to_string()),
            ready_message: "Resource is ready".to_string(),
        }
    }
}

/// Result of a run: `Ok(Some(d))` requeue after `d`, `Ok(None)` done
pub type RunResult = Result<Option<Duration>, ReconcileError>;

/// Drives step chains for one resource kind
pub struct Runner<K> {
    kind: &'static str,
    store: Arc<dyn ResourceStore<K>>,
    metrics: Arc<ControllerMetrics>,
    options: RunnerOptions,
}

impl<K> std::fmt::Debug for Runner<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("kind", &self.kind)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Owns the snapshot taken at the start of a run and performs the single
/// status patch when released
struct RunGuard<K> {
    original_status: serde_json::Value,
    ctx: StepContext<K>,
}

impl<K: Converged> Runner<K> {
    pub fn new(
        kind: &'static str,
        store: Arc<dyn ResourceStore<K>>,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            kind,
            store,
            metrics,
            options: RunnerOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore<K>> {
        &self.store
    }

    /// Run `steps` against `resource`
    pub async fn run(
        &self,
        resource: K,
        steps: &[&dyn Step<K>],
        cancel: &CancellationToken,
    ) -> RunResult {
        let span = info_span!(
            "convergence.run",
            resource.kind = self.kind,
            resource.name = resource.name_or_unknown(),
            resource.namespace = resource.namespace_or_default(),
            generation = resource.generation_or_zero(),
        );
        self.run_guarded(resource, steps, cancel)
            .instrument(span)
            .await
    }

    async fn run_guarded(
        &self,
        resource: K,
        steps: &[&dyn Step<K>],
        cancel: &CancellationToken,
    ) -> RunResult {
        let started = Instant::now();
        self.metrics.increment_reconciliations(self.kind);

        let mut guard = self.open(resource, cancel.clone())?;
        let result = self.execute(&mut guard.ctx, steps, cancel).await;
        let result = self.release(guard, result).await;

        self.metrics
            .observe_reconciliation_duration(self.kind, started.elapsed().as_secs_f64());
        match &result {
            Ok(Some(after)) => debug!(requeue_after_ms = after.as_millis(), "run.requeue"),
            Ok(None) => debug!("run.done"),
            Err(e) => {
                self.metrics.increment_reconciliation_errors(self.kind, e.kind());
            }
        }
        result
    }

    fn open(&self, resource: K, cancel: CancellationToken) -> Result<RunGuard<K>, ReconcileError> {
        let original_status = status_value(&resource)?;
        let mut ctx = StepContext::new(resource, cancel);
        let stamp = ReconcileStamp::new(ctx.generation, ctx.started_at);
        ctx.resource.convergence_mut().last_reconcile = Some(stamp);
        Ok(RunGuard {
            original_status,
            ctx,
        })
    }

    async fn execute(
        &self,
        ctx: &mut StepContext<K>,
        steps: &[&dyn Step<K>],
        cancel: &CancellationToken,
    ) -> RunResult {
        for step in steps {
            if cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }
            let name = step.name();
            let step_span = info_span!("convergence.step", step = name);

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(ReconcileError::Cancelled),
                caught = AssertUnwindSafe(step.run(ctx)).catch_unwind().instrument(step_span) => {
                    caught.unwrap_or_else(|panic| Err(ReconcileError::StepPanicked {
                        step: name.to_string(),
                        message: panic_message(panic.as_ref()),
                    }))
                }
            };

            match outcome {
                Ok(Outcome::Continue) => {}
                Ok(Outcome::Requeue(after)) if after.is_zero() => {}
                Ok(Outcome::Requeue(after)) => {
                    debug!(step = name, requeue_after_ms = after.as_millis(), "step.requeue");
                    self.metrics.increment_requeues(self.kind, "step");
                    return Ok(Some(after));
                }
                Ok(Outcome::Stop) => {
                    debug!(step = name, "step.stop");
                    return Ok(None);
                }
                Err(ReconcileError::Cancelled) => return Err(ReconcileError::Cancelled),
                Err(e) if e.is_conflict() => {
                    debug!(step = name, error = %e, "step.conflict, requeueing");
                    self.metrics.increment_requeues(self.kind, "conflict");
                    return Ok(Some(self.options.conflict_requeue));
                }
                Err(e) => {
                    error!(step = name, error = %e, "step.failed");
                    return Err(e);
                }
            }
        }

        let generation = ctx.generation;
        if let Some(ready) = &self.options.ready_condition {
            let message = self.options.ready_message.clone();
            ctx.conditions().success(ready, message);
        }
        ctx.resource.convergence_mut().last_success =
            Some(ReconcileStamp::new(generation, Utc::now()));
        Ok(None)
    }

    async fn release(&self, guard: RunGuard<K>, result: RunResult) -> RunResult {
        if matches!(result, Err(ReconcileError::Cancelled)) {
            warn!("run cancelled, status not persisted");
            return result;
        }
        match (result, self.persist(&guard).await) {
            (result, Ok(())) => result,
            (Ok(_), Err(patch_err)) => Err(patch_err),
            (Err(step_err), Err(patch_err)) => {
                warn!(error = %patch_err, "status patch failed after step error");
                Err(step_err)
            }
        }
    }

    async fn persist(&self, guard: &RunGuard<K>) -> Result<(), ReconcileError> {
        let current = status_value(&guard.ctx.resource)?;
        let Some(delta) = merge_patch_diff(&guard.original_status, &current) else {
            debug!("status unchanged, skipping patch");
            return Ok(());
        };
        let patch = serde_json::json!({ "status": delta });
        match self.store.patch_status(&guard.ctx.resource, &patch).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!("resource deleted during reconciliation, skipping status patch");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn status_value<K: Converged>(resource: &K) -> Result<serde_json::Value, serde_json::Error> {
    let mut value = serde_json::to_value(resource)?;
    Ok(value
        .get_mut("status")
        .map(serde_json::Value::take)
        .unwrap_or(serde_json::Value::Null))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

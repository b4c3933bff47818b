//! # Constants
//!
//! Default values and well-known names shared across the controllers.

/// Field manager used for status and metadata patches
pub const FIELD_MANAGER: &str = "convergence-controller";

/// Finalizer placed on every resource the controllers manage
pub const FINALIZER_NAME: &str = "convergence.microscaler.io/finalizer";

/// Finalizer the API server adds for foreground cascading deletion
pub const DELETE_DEPENDENTS_FINALIZER: &str = "foregroundDeletion";

/// Annotation stamped by the drift controller to request a re-validation (RFC3339)
pub const DRIFT_REQUESTED_ANNOTATION: &str = "convergence.microscaler.io/drift-requested-at";

/// Annotation on the workspace ConfigMap carrying the owning resource generation
pub const WORKSPACE_GENERATION_ANNOTATION: &str = "convergence.microscaler.io/generation";

/// Annotation written by the executor with the generation it last processed
pub const WORKSPACE_OBSERVED_GENERATION_ANNOTATION: &str =
    "convergence.microscaler.io/observed-generation";

/// Label on the workspace ConfigMap pointing back at its CloudResource
pub const WORKSPACE_OWNER_LABEL: &str = "convergence.microscaler.io/cloud-resource";

/// Condition types
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_PLAN: &str = "Plan";
pub const CONDITION_APPLY: &str = "Apply";
pub const CONDITION_REVISION: &str = "Revision";
pub const CONDITION_VALIDATED: &str = "Validated";

/// Default requeue after an optimistic-concurrency conflict (milliseconds)
pub const DEFAULT_CONFLICT_REQUEUE_MS: u64 = 5;

/// Requeue used when a step changed metadata and wants the next pass to see it (milliseconds)
pub const IMMEDIATE_REQUEUE_MS: u64 = 5;

/// Default number of concurrent reconciliations per controller
pub const DEFAULT_WORKER_CONCURRENCY: u16 = 4;

/// Default drift admission recheck interval
pub const DEFAULT_DRIFT_CHECK_INTERVAL: &str = "5m";

/// Default minimum quiet period before a drift check may be triggered
pub const DEFAULT_DRIFT_INTERVAL: &str = "2h";

/// Default fleet-wide fraction of resources allowed mid-drift-check
pub const DEFAULT_DRIFT_THRESHOLD: f64 = 0.2;

/// Default interval for polling dependencies and executor progress
pub const DEFAULT_DEPENDENCY_POLL_INTERVAL: &str = "30s";

/// Default Fibonacci backoff bounds for reconciliation errors (minutes)
pub const DEFAULT_ERROR_BACKOFF_MIN_MINUTES: u64 = 1;
pub const DEFAULT_ERROR_BACKOFF_MAX_MINUTES: u64 = 10;

/// Provider types accepted by the provider controller unless overridden
pub const DEFAULT_SUPPORTED_PROVIDERS: &str = "aws,gcp,azure";

/// Controllers started by the binary unless overridden
pub const DEFAULT_CONTROLLERS: &str = "plan,provider,cloud-resource,drift";

/// Default requeue when a reconciliation error occurs and backoff state is unavailable (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

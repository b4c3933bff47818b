//! # Error Policy
//!
//! Retry cadence for failed convergence runs and classification of watch
//! stream errors.
//!
//! Backoff state is tracked per resource so one failing resource never slows
//! down the others. A successful run resets it.

use crate::constants;
use crate::controller::backoff::BackoffState;
use crate::controller::ReconcileError;
use crate::observability::ControllerMetrics;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

/// Fibonacci backoff per resource key
#[derive(Debug)]
pub struct ErrorPolicy {
    kind: &'static str,
    min_minutes: u64,
    max_minutes: u64,
    metrics: Arc<ControllerMetrics>,
    states: Mutex<HashMap<String, BackoffState>>,
}

impl ErrorPolicy {
    pub fn new(
        kind: &'static str,
        min_minutes: u64,
        max_minutes: u64,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            kind,
            min_minutes,
            max_minutes,
            metrics,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Requeue delay after `error`; `None` means wait for the next change
    pub fn on_error(&self, resource_key: &str, error: &ReconcileError) -> Option<Duration> {
        if matches!(error, ReconcileError::Cancelled) {
            info!(resource = resource_key, "run cancelled, not scheduling a retry");
            return None;
        }

        let (seconds, error_count) = match self.states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(|| BackoffState::new(self.min_minutes, self.max_minutes));
                state.increment_error();
                (state.backoff.next_backoff_seconds(), state.error_count)
            }
            Err(e) => {
                warn!(error = %e, "backoff state lock poisoned, using default backoff");
                (constants::DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS, 0)
            }
        };

        error!(
            resource.kind = self.kind,
            resource = resource_key,
            error = %error,
            error_count,
            retry_in_secs = seconds,
            "reconciliation.error"
        );
        self.metrics.increment_requeues(self.kind, "error-backoff");
        Some(Duration::from_secs(seconds))
    }

    pub fn reset(&self, resource_key: &str) {
        if let Ok(mut states) = self.states.lock() {
            states.remove(resource_key);
        }
    }

    /// Drop backoff state of resources not in `live`
    pub fn retain_live(&self, live: &HashSet<String>) {
        if let Ok(mut states) = self.states.lock() {
            states.retain(|key, _| live.contains(key));
        }
    }

    pub fn error_count(&self, resource_key: &str) -> u32 {
        self.states
            .lock()
            .ok()
            .and_then(|s| s.get(resource_key).map(|b| b.error_count))
            .unwrap_or(0)
    }
}

/// Broad class of a watch stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// RBAC revoked or token expired
    Unauthorized,
    /// Resource version too old; the watcher relists
    Expired,
    /// API server throttling or storage reinitializing
    Throttled,
    Other,
}

pub fn classify_watch_error(error: &str) -> WatchErrorKind {
    if error.contains("401") || error.contains("Unauthorized") || error.contains("Forbidden") {
        WatchErrorKind::Unauthorized
    } else if error.contains("410")
        || error.contains("too old resource version")
        || error.contains("Expired")
    {
        WatchErrorKind::Expired
    } else if error.contains("429")
        || error.contains("TooManyRequests")
        || error.contains("storage is (re)initializing")
    {
        WatchErrorKind::Throttled
    } else {
        WatchErrorKind::Other
    }
}

/// Log a watch stream error at a level matching its class
pub fn log_watch_error(kind: &str, error: &str) {
    match classify_watch_error(error) {
        WatchErrorKind::Unauthorized => error!(
            resource.kind = kind,
            error,
            "watch.unauthorized: check the controller ClusterRole and ServiceAccount"
        ),
        WatchErrorKind::Expired => {
            warn!(resource.kind = kind, error, "watch.resource_version_expired");
        }
        WatchErrorKind::Throttled => warn!(resource.kind = kind, error, "watch.throttled"),
        WatchErrorKind::Other => error!(resource.kind = kind, error, "watch.error"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ErrorPolicy {
        ErrorPolicy::new("plan", 1, 10, Arc::new(ControllerMetrics::unregistered()))
    }

    #[test]
    fn test_backoff_grows_per_resource_and_resets() {
        let policy = policy();
        let err = ReconcileError::Failed(anyhow::anyhow!("boom"));
        let delays: Vec<u64> = (0..4)
            .filter_map(|_| policy.on_error("default/a", &err))
            .map(|d| d.as_secs() / 60)
            .collect();
        assert_eq!(delays, vec![1, 1, 2, 3]);
        assert_eq!(policy.error_count("default/a"), 4);
        assert_eq!(policy.on_error("default/b", &err), Some(Duration::from_secs(60)));

        policy.reset("default/a");
        assert_eq!(policy.error_count("default/a"), 0);
        assert_eq!(policy.on_error("default/a", &err), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_state_of_vanished_resources_is_dropped() {
        let policy = policy();
        let err = ReconcileError::Failed(anyhow::anyhow!("boom"));
        policy.on_error("default/a", &err);
        policy.on_error("default/b", &err);

        policy.retain_live(&HashSet::from(["default/b".to_string()]));

        assert_eq!(policy.error_count("default/a"), 0);
        assert_eq!(policy.error_count("default/b"), 1);
    }

    #[test]
    fn test_cancellation_does_not_back_off() {
        let policy = policy();
        assert_eq!(policy.on_error("default/a", &ReconcileError::Cancelled), None);
        assert_eq!(policy.error_count("default/a"), 0);
    }

    #[test]
    fn test_watch_error_classification() {
        assert_eq!(
            classify_watch_error("ApiError: Unauthorized (401)"),
            WatchErrorKind::Unauthorized
        );
        assert_eq!(
            classify_watch_error("too old resource version: 123 (410)"),
            WatchErrorKind::Expired
        );
        assert_eq!(
            classify_watch_error("storage is (re)initializing"),
            WatchErrorKind::Throttled
        );
        assert_eq!(classify_watch_error("connection reset"), WatchErrorKind::Other);
    }
}

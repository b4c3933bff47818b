//! # Controller Configuration
//!
//! Tunables shared by every controller, loaded from environment variables.

use crate::constants::*;
use crate::controller::drift::DriftPolicy;
use crate::config::duration::parse_kubernetes_duration;
use std::time::Duration;
use tracing::warn;

/// Controller configuration
///
/// All settings have defaults and can be overridden via environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    /// Concurrent reconciliations per controller
    pub worker_concurrency: u16,
    /// Requeue after an optimistic-concurrency conflict
    pub conflict_requeue: Duration,
    /// Drift admission recheck interval
    pub drift_check_interval: Duration,
    /// Minimum quiet period since the last plan/apply transition before a drift check
    pub drift_interval: Duration,
    /// Fleet fraction mid-drift-check that blocks new drift checks
    pub drift_threshold: f64,
    /// Poll interval while waiting on dependencies or the executor
    pub dependency_poll_interval: Duration,
    /// Error backoff bounds (minutes)
    pub error_backoff_min_minutes: u64,
    pub error_backoff_max_minutes: u64,
    /// Provider types the provider controller accepts
    pub supported_providers: Vec<String>,
    /// Controllers the binary starts
    pub controllers: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let lookup = &lookup;
        Self {
            worker_concurrency: env_var_or_default(
                lookup,
                "WORKER_CONCURRENCY",
                DEFAULT_WORKER_CONCURRENCY,
            )
            .max(1),
            // Immediate but never zero
            conflict_requeue: Duration::from_millis(
                env_var_or_default(lookup, "CONFLICT_REQUEUE_MS", DEFAULT_CONFLICT_REQUEUE_MS)
                    .max(1),
            ),
            drift_check_interval: duration_or_default(
                lookup,
                "DRIFT_CHECK_INTERVAL",
                DEFAULT_DRIFT_CHECK_INTERVAL,
            ),
            drift_interval: duration_or_default(lookup, "DRIFT_INTERVAL", DEFAULT_DRIFT_INTERVAL),
            drift_threshold: threshold_or_default(
                lookup,
                "DRIFT_THRESHOLD",
                DEFAULT_DRIFT_THRESHOLD,
            ),
            dependency_poll_interval: duration_or_default(
                lookup,
                "DEPENDENCY_POLL_INTERVAL",
                DEFAULT_DEPENDENCY_POLL_INTERVAL,
            ),
            error_backoff_min_minutes: env_var_or_default(
                lookup,
                "ERROR_BACKOFF_MIN_MINUTES",
                DEFAULT_ERROR_BACKOFF_MIN_MINUTES,
            ),
            error_backoff_max_minutes: env_var_or_default(
                lookup,
                "ERROR_BACKOFF_MAX_MINUTES",
                DEFAULT_ERROR_BACKOFF_MAX_MINUTES,
            ),
            supported_providers: list_or_default(
                lookup,
                "SUPPORTED_PROVIDERS",
                DEFAULT_SUPPORTED_PROVIDERS,
            ),
            controllers: list_or_default(lookup, "CONTROLLERS", DEFAULT_CONTROLLERS),
        }
    }

    pub fn drift_policy(&self) -> DriftPolicy {
        DriftPolicy {
            check_interval: self.drift_check_interval,
            drift_interval: self.drift_interval,
            threshold: self.drift_threshold,
            ..DriftPolicy::default()
        }
    }

    pub fn is_enabled(&self, controller: &str) -> bool {
        self.controllers.iter().any(|c| c == controller)
    }
}

/// Read a value or return the default when unset or unparsable
fn env_var_or_default<T: std::str::FromStr>(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    let Some(raw) = lookup(key) else {
        return default;
    };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            warn!(key, value = %raw, error = ?e, "invalid value, using default");
            default
        }
    }
}

/// A fraction in `0.0..=1.0`; NaN, infinities and out-of-range values fall back
fn threshold_or_default(lookup: &dyn Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    let value = env_var_or_default(lookup, key, default);
    if (0.0..=1.0).contains(&value) {
        value
    } else {
        warn!(key, value, "threshold must be between 0 and 1, using default");
        default
    }
}

fn duration_or_default(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Duration {
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    match parse_kubernetes_duration(&raw) {
        Ok(d) => d,
        Err(e) => {
            warn!(key, value = %raw, error = %e, "invalid duration, using default");
            parse_kubernetes_duration(default).unwrap_or(Duration::from_secs(60))
        }
    }
}

fn list_or_default(
    lookup: &dyn Fn(&str) -> Option<String>,
    key: &str,
    default: &str,
) -> Vec<String> {
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> ControllerConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ControllerConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = ControllerConfig::default();
        assert_eq!(c.worker_concurrency, 4);
        assert_eq!(c.conflict_requeue, Duration::from_millis(5));
        assert_eq!(c.drift_check_interval, Duration::from_secs(300));
        assert_eq!(c.drift_interval, Duration::from_secs(7200));
        assert!((c.drift_threshold - 0.2).abs() < f64::EPSILON);
        assert_eq!(c.dependency_poll_interval, Duration::from_secs(30));
        assert_eq!(c.supported_providers, vec!["aws", "gcp", "azure"]);
        assert!(c.is_enabled("cloud-resource"));
        assert!(c.is_enabled("drift"));
    }

    #[test]
    fn test_overrides_and_fallbacks() {
        let c = config(&[
            ("WORKER_CONCURRENCY", "16"),
            ("DRIFT_INTERVAL", "1h"),
            ("DRIFT_CHECK_INTERVAL", "soon"),
            ("DRIFT_THRESHOLD", "abc"),
            ("SUPPORTED_PROVIDERS", " AWS , ,onprem"),
            ("CONTROLLERS", "plan"),
        ]);
        assert_eq!(c.worker_concurrency, 16);
        assert_eq!(c.drift_interval, Duration::from_secs(3600));
        assert_eq!(c.drift_check_interval, Duration::from_secs(300));
        assert!((c.drift_threshold - 0.2).abs() < f64::EPSILON);
        assert_eq!(c.supported_providers, vec!["aws", "onprem"]);
        assert!(c.is_enabled("plan"));
        assert!(!c.is_enabled("drift"));
        assert_eq!(c.drift_policy().drift_interval, Duration::from_secs(3600));
    }

    #[test]
    fn test_conflict_requeue_is_never_zero() {
        let c = config(&[("CONFLICT_REQUEUE_MS", "0")]);
        assert_eq!(c.conflict_requeue, Duration::from_millis(1));
    }

    #[test]
    fn test_threshold_must_be_a_fraction() {
        for raw in ["NaN", "inf", "-0.5", "1.5"] {
            let c = config(&[("DRIFT_THRESHOLD", raw)]);
            assert!((c.drift_threshold - 0.2).abs() < f64::EPSILON, "{raw} was accepted");
        }
        let c = config(&[("DRIFT_THRESHOLD", "0.5")]);
        assert!((c.drift_threshold - 0.5).abs() < f64::EPSILON);
    }
}

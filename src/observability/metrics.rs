//! # Controller Metrics
//!
//! Prometheus metrics for convergence runs. Metrics are registered on a
//! [`Registry`] passed in by whoever composes the controllers, so several
//! independent instances can coexist in one process (tests, embedders).

use anyhow::Result;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

#[derive(Debug, Clone)]
pub struct ControllerMetrics {
    reconciliations_total: IntCounterVec,
    reconciliation_errors_total: IntCounterVec,
    reconciliation_duration: HistogramVec,
    requeues_total: IntCounterVec,
    drift_checks_triggered_total: IntCounter,
}

impl ControllerMetrics {
    /// Create the metrics and register them on `registry`
    #[allow(
        clippy::missing_errors_doc,
        reason = "Fails only on duplicate registration"
    )]
    pub fn new(registry: &Registry) -> Result<Self> {
        let reconciliations_total = IntCounterVec::new(
            Opts::new(
                "convergence_reconciliations_total",
                "Total number of convergence runs",
            ),
            &["kind"],
        )?;
        let reconciliation_errors_total = IntCounterVec::new(
            Opts::new(
                "convergence_reconciliation_errors_total",
                "Total number of convergence runs that ended in an error",
            ),
            &["kind", "error"],
        )?;
        let reconciliation_duration = HistogramVec::new(
            HistogramOpts::new(
                "convergence_reconciliation_duration_seconds",
                "Duration of convergence runs in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
            &["kind"],
        )?;
        let requeues_total = IntCounterVec::new(
            Opts::new(
                "convergence_requeues_total",
                "Total number of requeues by reason",
            ),
            &["kind", "reason"],
        )?;
        let drift_checks_triggered_total = IntCounter::new(
            "convergence_drift_checks_triggered_total",
            "Total number of drift checks triggered",
        )?;

        registry.register(Box::new(reconciliations_total.clone()))?;
        registry.register(Box::new(reconciliation_errors_total.clone()))?;
        registry.register(Box::new(reconciliation_duration.clone()))?;
        registry.register(Box::new(requeues_total.clone()))?;
        registry.register(Box::new(drift_checks_triggered_total.clone()))?;

        Ok(Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconciliation_duration,
            requeues_total,
            drift_checks_triggered_total,
        })
    }

    /// Metrics registered on a throwaway registry
    #[allow(
        clippy::missing_panics_doc,
        reason = "A fresh registry never holds duplicates"
    )]
    pub fn unregistered() -> Self {
        #[allow(clippy::expect_used, reason = "A fresh registry never holds duplicates")]
        Self::new(&Registry::new()).expect("metrics on a fresh registry")
    }

    pub fn increment_reconciliations(&self, kind: &str) {
        self.reconciliations_total.with_label_values(&[kind]).inc();
    }

    pub fn increment_reconciliation_errors(&self, kind: &str, error: &str) {
        self.reconciliation_errors_total
            .with_label_values(&[kind, error])
            .inc();
    }

    pub fn observe_reconciliation_duration(&self, kind: &str, seconds: f64) {
        self.reconciliation_duration
            .with_label_values(&[kind])
            .observe(seconds);
    }

    pub fn increment_requeues(&self, kind: &str, reason: &str) {
        self.requeues_total.with_label_values(&[kind, reason]).inc();
    }

    pub fn increment_drift_checks_triggered(&self) {
        self.drift_checks_triggered_total.inc();
    }

    pub fn reconciliations(&self, kind: &str) -> u64 {
        self.reconciliations_total.with_label_values(&[kind]).get()
    }

    pub fn reconciliation_errors(&self, kind: &str, error: &str) -> u64 {
        self.reconciliation_errors_total
            .with_label_values(&[kind, error])
            .get()
    }

    pub fn requeues(&self, kind: &str, reason: &str) -> u64 {
        self.requeues_total.with_label_values(&[kind, reason]).get()
    }

    pub fn drift_checks_triggered(&self) -> u64 {
        self.drift_checks_triggered_total.get()
    }
}

//! # Reconcile Errors
//!
//! Error taxonomy for convergence runs. The runner is the only place that turns
//! these into a retry cadence:
//!
//! - conflicts (optimistic-concurrency failures) become a short requeue
//! - cancellation abandons the run without persisting status
//! - everything else propagates to the error policy and is retried with backoff

use crate::controller::revision::RevisionError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Revision(#[from] RevisionError),

    #[error("failed to (de)serialize resource: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("step {step} panicked: {message}")]
    StepPanicked { step: String, message: String },

    #[error("reconciliation cancelled")]
    Cancelled,

    #[error("reconciliation failed: {0}")]
    Failed(#[from] anyhow::Error),
}

impl ReconcileError {
    /// Optimistic-concurrency conflict raised by a store write inside a step
    pub fn is_conflict(&self) -> bool {
        match self {
            ReconcileError::Store(e) => e.is_conflict(),
            ReconcileError::Failed(e) => e
                .downcast_ref::<StoreError>()
                .is_some_and(StoreError::is_conflict),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ReconcileError::Store(e) => e.is_not_found(),
            ReconcileError::Failed(e) => e
                .downcast_ref::<StoreError>()
                .is_some_and(StoreError::is_not_found),
            _ => false,
        }
    }

    /// Short label for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Store(StoreError::Conflict { .. }) => "conflict",
            ReconcileError::Store(StoreError::NotFound { .. }) => "not_found",
            ReconcileError::Store(_) => "store",
            ReconcileError::Revision(_) => "revision",
            ReconcileError::Serialization(_) => "serialization",
            ReconcileError::StepPanicked { .. } => "panic",
            ReconcileError::Cancelled => "cancelled",
            ReconcileError::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_detected_through_anyhow() {
        let store_err = StoreError::Conflict {
            key: "default/a".to_string(),
            message: "stale".to_string(),
        };
        let err = ReconcileError::Failed(anyhow::Error::new(store_err));
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_plain_failure_is_not_conflict() {
        let err = ReconcileError::Failed(anyhow::anyhow!("boom"));
        assert!(!err.is_conflict());
        assert_eq!(err.kind(), "failed");
    }
}

//! # Reconcilers
//!
//! Per-kind step chains built on the convergence engine:
//!
//! - [`plan`] - latest revision selection
//! - [`provider`] - provider validation
//! - [`cloud_resource`] - workspace rendering and executor progress
//! - [`drift`] - drift admission for CloudResources

pub mod cloud_resource;
pub mod common;
pub mod drift;
pub mod plan;
pub mod provider;

pub use cloud_resource::{CloudResourceReconciler, CloudResourceStores};
pub use drift::DriftReconciler;
pub use plan::PlanReconciler;
pub use provider::ProviderReconciler;

use crate::controller::RunResult;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// One controller's entry point: run the chain for a resource
#[async_trait]
pub trait Reconcile<K: Send + 'static>: Send + Sync + 'static {
    /// Label used in logs and metrics
    fn kind(&self) -> &'static str;

    async fn reconcile(&self, resource: K, cancel: &CancellationToken) -> RunResult;
}

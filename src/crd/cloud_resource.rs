//! # CloudResource
//!
//! A cloud resource whose configuration is rendered from a [`Plan`](super::Plan)
//! revision and executed against a [`Provider`](super::Provider).

use super::{preserve_unknown_fields, Converged, ConvergenceStatus, LocalRef};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CloudResource Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: convergence.microscaler.io/v1
/// kind: CloudResource
/// metadata:
///   name: orders-db
///   namespace: default
/// spec:
///   providerRef:
///     name: aws-prod
///   planRef:
///     name: postgres
///   parameters:
///     instanceClass: db.t4g.medium
///   driftDetection:
///     enabled: true
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "CloudResource",
    group = "convergence.microscaler.io",
    version = "v1",
    namespaced,
    status = "CloudResourceStatus",
    shortname = "clr",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}, {"name":"Revision", "type":"string", "jsonPath":".status.appliedRevision"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudResourceSpec {
    /// Provider that executes this resource
    pub provider_ref: LocalRef,
    /// Plan whose latest revision renders the configuration
    pub plan_ref: LocalRef,
    /// Free-form parameters merged into the rendered configuration
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub parameters: serde_json::Value,
    /// Periodic drift re-validation
    #[serde(default)]
    pub drift_detection: DriftDetection,
}

/// Drift detection settings
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DriftDetection {
    /// When false the drift controller never triggers a re-validation
    #[serde(default)]
    pub enabled: bool,
}

/// Status of the CloudResource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudResourceStatus {
    #[serde(flatten)]
    pub convergence: ConvergenceStatus,
    /// Plan revision last submitted to the executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_revision: Option<String>,
    /// Version of the applied revision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_version: Option<String>,
}

impl Converged for CloudResource {
    fn convergence(&self) -> Option<&ConvergenceStatus> {
        self.status.as_ref().map(|s| &s.convergence)
    }

    fn convergence_mut(&mut self) -> &mut ConvergenceStatus {
        &mut self.status.get_or_insert_with(Default::default).convergence
    }
}

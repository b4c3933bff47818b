//! # Plan
//!
//! A set of named, semantically-versioned configuration revisions.

use super::{preserve_unknown_fields, Converged, ConvergenceStatus};
use crate::controller::revision::Versioned;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Plan Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: convergence.microscaler.io/v1
/// kind: Plan
/// metadata:
///   name: postgres
/// spec:
///   revisions:
///     - name: postgres-14
///       version: 1.4.0
///       configuration:
///         engine: postgres
///         engineVersion: "14"
///     - name: postgres-16
///       version: 2.0.0-rc.1
///       configuration:
///         engine: postgres
///         engineVersion: "16"
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Plan",
    group = "convergence.microscaler.io",
    version = "v1",
    namespaced,
    status = "PlanStatus",
    printcolumn = r#"{"name":"Latest", "type":"string", "jsonPath":".status.latestRevision"}, {"name":"Version", "type":"string", "jsonPath":".status.latestVersion"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PlanSpec {
    /// Unordered list of revisions; the highest version wins
    #[serde(default)]
    pub revisions: Vec<PlanRevision>,
}

/// One named revision of a plan
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanRevision {
    pub name: String,
    /// Semantic version, e.g. `1.2.3` or `2.0.0-rc.1`
    pub version: String,
    /// Configuration template handed to the executor
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub configuration: serde_json::Value,
}

impl Versioned for PlanRevision {
    fn revision_name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }
}

/// Status of the Plan
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PlanStatus {
    #[serde(flatten)]
    pub convergence: ConvergenceStatus,
    /// Name of the revision with the highest version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_revision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
}

impl Plan {
    /// The revision currently published in status, if it still exists in the spec
    pub fn latest(&self) -> Option<&PlanRevision> {
        let name = self.status.as_ref()?.latest_revision.as_deref()?;
        self.spec.revisions.iter().find(|r| r.name == name)
    }
}

impl Converged for Plan {
    fn convergence(&self) -> Option<&ConvergenceStatus> {
        self.status.as_ref().map(|s| &s.convergence)
    }

    fn convergence_mut(&mut self) -> &mut ConvergenceStatus {
        &mut self.status.get_or_insert_with(Default::default).convergence
    }
}

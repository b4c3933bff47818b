//! # Provider
//!
//! Credentials and target settings for the executor that applies cloud resources.

use super::{Converged, ConvergenceStatus};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Provider Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: convergence.microscaler.io/v1
/// kind: Provider
/// metadata:
///   name: aws-prod
/// spec:
///   type: aws
///   region: eu-west-1
///   credentialsSecretRef:
///     name: aws-prod-credentials
///     key: credentials
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "Provider",
    group = "convergence.microscaler.io",
    version = "v1",
    namespaced,
    status = "ProviderStatus",
    printcolumn = r#"{"name":"Type", "type":"string", "jsonPath":".spec.type"}, {"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSpec {
    /// Provider type, e.g. `aws`, `gcp`, `azure`
    pub r#type: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Secret holding the credentials, in the provider's namespace
    #[serde(default)]
    pub credentials_secret_ref: Option<SecretKeyRef>,
}

/// Reference to one key of a Secret
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

/// Status of the Provider
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    #[serde(flatten)]
    pub convergence: ConvergenceStatus,
}

impl Converged for Provider {
    fn convergence(&self) -> Option<&ConvergenceStatus> {
        self.status.as_ref().map(|s| &s.convergence)
    }

    fn convergence_mut(&mut self) -> &mut ConvergenceStatus {
        &mut self.status.get_or_insert_with(Default::default).convergence
    }
}

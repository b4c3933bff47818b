//! # Custom Resource Definitions
//!
//! CRD types for the convergence controllers and the [`Converged`] capability
//! trait the engine works against.
//!
//! The engine never names a concrete kind. Anything that embeds a
//! [`ConvergenceStatus`] and implements [`Converged`] can be driven by the
//! [`Runner`](crate::controller::runner::Runner).

mod cloud_resource;
mod plan;
mod provider;
mod status;

pub use cloud_resource::*;
pub use plan::*;
pub use provider::*;
pub use status::*;

use crate::store::StoredObject;
use schemars::{Schema, SchemaGenerator};

/// A resource with a desired spec and a convergence status
///
/// Implementors expose their embedded [`ConvergenceStatus`]; identity comes
/// from the object metadata every Kubernetes resource carries.
pub trait Converged: StoredObject {
    /// Embedded convergence status, if the resource has a status yet
    fn convergence(&self) -> Option<&ConvergenceStatus>;

    /// Embedded convergence status, created empty when missing
    fn convergence_mut(&mut self) -> &mut ConvergenceStatus;

    fn name_or_unknown(&self) -> &str {
        self.meta().name.as_deref().unwrap_or("unknown")
    }

    fn namespace_or_default(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or("default")
    }

    fn generation_or_zero(&self) -> i64 {
        self.meta().generation.unwrap_or(0)
    }

    fn is_being_deleted(&self) -> bool {
        self.meta().deletion_timestamp.is_some()
    }

    /// `namespace/name`, used for per-resource bookkeeping
    fn resource_key(&self) -> String {
        format!("{}/{}", self.namespace_or_default(), self.name_or_unknown())
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.meta()
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }
}

/// Schema for opaque JSON payloads the API server must keep as-is
pub(crate) fn preserve_unknown_fields(_gen: &mut SchemaGenerator) -> Schema {
    schemars::json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

/// Reference to another resource in the same namespace
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalRef {
    pub name: String,
}

//! # Convergence Controller
//!
//! A Kubernetes controller family that drives declarative resources towards
//! their desired state, one ordered step chain per kind.
//!
//! ## Overview
//!
//! Every kind embeds a [`ConvergenceStatus`](crd::ConvergenceStatus): a list
//! of typed conditions plus kind-specific fields. A [`Runner`](controller::Runner)
//! executes the kind's steps in order against a working copy of the resource
//! and persists the status once, at the end of the run.
//!
//! - **Plan** - versioned configuration templates; the latest revision is selected by semver
//! - **Provider** - cloud provider validation against a credentials secret
//! - **CloudResource** - renders a workspace ConfigMap for an external executor and
//!   tracks its progress
//! - **Drift** - periodically re-requests CloudResource execution, bounded fleet-wide
//!
//! Deletion is finalizer-guarded: Plans and Providers stay around while a
//! CloudResource still references them.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod reconcilers;
pub mod runtime;
pub mod store;

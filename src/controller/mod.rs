//! # Convergence Engine
//!
//! Generic machinery shared by every controller: condition bookkeeping, the
//! step runner, finalizer lifecycle, drift admission and revision selection.

pub mod backoff;
pub mod conditions;
pub mod drift;
pub mod error;
pub mod finalizer;
pub mod revision;
pub mod runner;

pub use conditions::ConditionManager;
pub use error::ReconcileError;
pub use finalizer::Finalizer;
pub use runner::{Outcome, RunResult, Runner, RunnerOptions, Step, StepContext};

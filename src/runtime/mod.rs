//! # Runtime
//!
//! Process-level plumbing: initialization, the per-kind watch loop, error
//! backoff and the wiring that starts every enabled controller.

pub mod controllers;
pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use controllers::run_controllers;
pub use error_policy::{ErrorPolicy, WatchErrorKind};
pub use initialization::{initialize, InitializationResult};
pub use watch_loop::{run_controller, ChangeFilter, WatchOptions};

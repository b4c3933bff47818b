//! # Configuration
//!
//! Controller-level configuration loaded from environment variables
//! (populated from a ConfigMap using `envFrom` in the deployment).

mod controller;
pub mod duration;

pub use controller::ControllerConfig;
pub use duration::parse_kubernetes_duration;

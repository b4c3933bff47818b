//! # Observability
//!
//! Prometheus metrics and Kubernetes event publishing.

pub mod events;
pub mod metrics;

pub use events::{EventSink, KubeEventSink, MemoryEventSink, RecordedEvent, Severity};
pub use metrics::ControllerMetrics;

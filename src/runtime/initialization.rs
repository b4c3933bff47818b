//! # Initialization
//!
//! Process setup: rustls crypto provider, tracing subscriber, configuration,
//! metrics registry and Kubernetes client.

use crate::config::ControllerConfig;
use crate::crd::Converged;
use crate::observability::ControllerMetrics;
use crate::store::ResourceStore;
use anyhow::{Context, Result};
use kube::Client;
use prometheus::Registry;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the controllers are composed from
#[derive(Clone)]
pub struct InitializationResult {
    pub client: Client,
    pub config: ControllerConfig,
    /// Registry the metrics are registered on; owned by the process, not global
    pub registry: Registry,
    pub metrics: Arc<ControllerMetrics>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Install the tracing subscriber, honouring `RUST_LOG`
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "convergence_controller=info".into());
    if let Err(e) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("tracing subscriber already initialized: {e}");
    }
}

pub async fn initialize() -> Result<InitializationResult> {
    // Must happen before any TLS connection is made
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider was already installed");
    }

    init_tracing();
    info!(version = env!("CARGO_PKG_VERSION"), "Starting convergence controller");

    let config = ControllerConfig::from_env();
    info!(
        controllers = ?config.controllers,
        workers = config.worker_concurrency,
        drift_interval_secs = config.drift_interval.as_secs(),
        drift_threshold = config.drift_threshold,
        "configuration.loaded"
    );

    let registry = Registry::new();
    let metrics =
        Arc::new(ControllerMetrics::new(&registry).context("Failed to register metrics")?);

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    Ok(InitializationResult {
        client,
        config,
        registry,
        metrics,
    })
}

/// Log how many resources of a kind exist per namespace; a failure here
/// usually means the CRD is not installed
pub async fn log_resource_summary<K: Converged>(kind: &str, store: &dyn ResourceStore<K>) {
    match store.list(None, None).await {
        Ok(items) => {
            let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for item in &items {
                by_namespace
                    .entry(item.namespace_or_default().to_string())
                    .or_default()
                    .push(item.name_or_unknown().to_string());
            }
            info!(
                resource.kind = kind,
                total = items.len(),
                namespaces = by_namespace.len(),
                "startup.resource_summary"
            );
            for (namespace, mut names) in by_namespace {
                names.sort();
                info!(
                    resource.kind = kind,
                    namespace = %namespace,
                    count = names.len(),
                    names = %names.join(","),
                    "startup.namespace"
                );
            }
        }
        Err(e) => warn!(
            resource.kind = kind,
            error = %e,
            "Resource kind is not queryable, is the CRD installed? \
             The controller will keep retrying"
        ),
    }
}

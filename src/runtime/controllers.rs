//! # Controller Wiring
//!
//! Builds the stores and reconcilers for each enabled controller and runs
//! them side by side until shutdown.

use super::initialization::{log_resource_summary, InitializationResult};
use super::watch_loop::{run_controller, WatchOptions};
use crate::constants::FIELD_MANAGER;
use crate::crd::{CloudResource, Plan, Provider};
use crate::observability::{EventSink, KubeEventSink};
use crate::reconcilers::common::{dependents, plan_reference, provider_reference};
use crate::reconcilers::{
    cloud_resource, drift, plan, provider, CloudResourceReconciler, CloudResourceStores,
    DriftReconciler, PlanReconciler, ProviderReconciler,
};
use crate::store::{KubeStore, ResourceStore};
use anyhow::{bail, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::runtime::controller::Controller;
use kube::runtime::watcher;
use kube::{Api, Client};
use std::convert::identity;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

const KNOWN_CONTROLLERS: [&str; 4] = [
    plan::KIND,
    provider::KIND,
    cloud_resource::KIND,
    drift::KIND,
];

fn kube_store<K>(init: &InitializationResult) -> Arc<KubeStore<K>>
where
    K: crate::store::StoredObject + kube::Resource<Scope = kube::core::NamespaceResourceScope>,
{
    Arc::new(KubeStore::new(init.client.clone()))
}

/// Re-run the CloudResources that reference a Plan or Provider whenever it
/// changes, status included: a newly published revision or a Provider losing
/// readiness never touches the CloudResource itself
fn watch_dependencies(
    client: Client,
) -> impl FnOnce(Controller<CloudResource>) -> Controller<CloudResource> {
    move |controller| {
        let by_plan = controller.store();
        let by_provider = controller.store();
        controller
            .watches(
                Api::<Plan>::all(client.clone()),
                watcher::Config::default(),
                move |plan| dependents(&by_plan.state(), plan_reference, &plan),
            )
            .watches(
                Api::<Provider>::all(client),
                watcher::Config::default(),
                move |provider| dependents(&by_provider.state(), provider_reference, &provider),
            )
    }
}

/// Run every controller listed in the configuration until `shutdown` fires
pub async fn run_controllers(
    init: &InitializationResult,
    shutdown: CancellationToken,
) -> Result<()> {
    let config = &init.config;
    if let Some(unknown) = config
        .controllers
        .iter()
        .find(|c| !KNOWN_CONTROLLERS.contains(&c.as_str()))
    {
        bail!(
            "Unknown controller '{unknown}', expected any of: {}",
            KNOWN_CONTROLLERS.join(", ")
        );
    }

    let plans: Arc<KubeStore<Plan>> = kube_store(init);
    let providers: Arc<KubeStore<Provider>> = kube_store(init);
    let cloud_resources: Arc<KubeStore<CloudResource>> = kube_store(init);
    let events: Arc<dyn EventSink> =
        Arc::new(KubeEventSink::new(init.client.clone(), FIELD_MANAGER));
    let metrics = &init.metrics;

    let mut running: Vec<BoxFuture<'static, ()>> = Vec::new();

    if config.is_enabled(plan::KIND) {
        log_resource_summary("Plan", plans.as_ref()).await;
        let reconciler = PlanReconciler::new(
            plans.clone(),
            cloud_resources.clone(),
            Arc::clone(metrics),
            config,
        );
        running.push(
            run_controller(
                Api::<Plan>::all(init.client.clone()),
                Arc::new(reconciler),
                WatchOptions::from_config(config, true),
                Arc::clone(metrics),
                shutdown.clone(),
                identity,
            )
            .boxed(),
        );
    }

    if config.is_enabled(provider::KIND) {
        log_resource_summary("Provider", providers.as_ref()).await;
        let secrets: Arc<dyn ResourceStore<Secret>> = kube_store::<Secret>(init);
        let reconciler = ProviderReconciler::new(
            providers.clone(),
            cloud_resources.clone(),
            secrets,
            Arc::clone(metrics),
            config,
        );
        running.push(
            run_controller(
                Api::<Provider>::all(init.client.clone()),
                Arc::new(reconciler),
                WatchOptions::from_config(config, true),
                Arc::clone(metrics),
                shutdown.clone(),
                identity,
            )
            .boxed(),
        );
    }

    if config.is_enabled(cloud_resource::KIND) {
        log_resource_summary("CloudResource", cloud_resources.as_ref()).await;
        let stores = CloudResourceStores {
            cloud_resources: cloud_resources.clone(),
            providers: providers.clone(),
            plans: plans.clone(),
            workspaces: kube_store::<ConfigMap>(init),
        };
        let reconciler =
            CloudResourceReconciler::new(stores, Arc::clone(&events), Arc::clone(metrics), config);
        running.push(
            run_controller(
                Api::<CloudResource>::all(init.client.clone()),
                Arc::new(reconciler),
                WatchOptions::from_config(config, true),
                Arc::clone(metrics),
                shutdown.clone(),
                watch_dependencies(init.client.clone()),
            )
            .boxed(),
        );
    }

    if config.is_enabled(drift::KIND) {
        let reconciler = DriftReconciler::new(
            cloud_resources.clone(),
            Arc::clone(&events),
            Arc::clone(metrics),
            config,
        );
        // The drift marker is an annotation this controller writes itself
        running.push(
            run_controller(
                Api::<CloudResource>::all(init.client.clone()),
                Arc::new(reconciler),
                WatchOptions::from_config(config, false),
                Arc::clone(metrics),
                shutdown.clone(),
                identity,
            )
            .boxed(),
        );
    }

    if running.is_empty() {
        bail!(
            "No controllers enabled; set CONTROLLERS to any of: {}",
            KNOWN_CONTROLLERS.join(", ")
        );
    }
    info!(count = running.len(), "controllers.started");
    futures::future::join_all(running).await;
    Ok(())
}

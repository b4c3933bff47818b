//! # Watch Loop
//!
//! Runs one reconciler as a `kube` controller.
//!
//! A filtered watch stream feeds the controller: only first sight, generation
//! changes, deletion and (optionally) annotation changes trigger a run.
//! Status-only writes, including the `lastReconcile` stamp every run makes,
//! never re-trigger. kube-runtime guarantees at most one run per object at a
//! time; `worker_concurrency` bounds runs across objects.

use super::error_policy::{log_watch_error, ErrorPolicy};
use crate::config::ControllerConfig;
use crate::controller::ReconcileError;
use crate::crd::Converged;
use crate::observability::ControllerMetrics;
use crate::reconcilers::Reconcile;
use futures::{future, StreamExt, TryStreamExt};
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Api;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

/// What a trigger must change for a run to start
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fingerprint {
    uid: Option<String>,
    generation: Option<i64>,
    deleting: bool,
    annotations: Option<BTreeMap<String, String>>,
}

/// Drops watch events that only touch status (or annotations, when ignored)
#[derive(Debug)]
pub struct ChangeFilter {
    watch_annotations: bool,
    seen: Mutex<HashMap<String, Fingerprint>>,
}

impl ChangeFilter {
    pub fn new(watch_annotations: bool) -> Self {
        Self {
            watch_annotations,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// True when `resource` differs from the last admitted version of it.
    /// A recreated object carries a new uid and is always admitted.
    pub fn admit<K: Converged>(&self, resource: &K) -> bool {
        let fingerprint = Fingerprint {
            uid: resource.meta().uid.clone(),
            generation: resource.meta().generation,
            deleting: resource.is_being_deleted(),
            annotations: if self.watch_annotations {
                resource.meta().annotations.clone()
            } else {
                None
            },
        };
        let Ok(mut seen) = self.seen.lock() else {
            return true;
        };
        match seen.insert(resource.resource_key(), fingerprint.clone()) {
            Some(previous) => previous != fingerprint,
            None => true,
        }
    }

    pub fn forget(&self, resource_key: &str) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.remove(resource_key);
        }
    }

    /// Drop every fingerprint whose key is not in `live`
    pub fn retain_live(&self, live: &HashSet<String>) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.retain(|key, _| live.contains(key));
        }
    }

    pub fn tracked(&self) -> usize {
        self.seen.lock().map(|seen| seen.len()).unwrap_or(0)
    }
}

/// Turn one watch event into a trigger, keeping per-object state bounded to
/// the objects that still exist
fn route<K: Converged>(
    event: watcher::Event<K>,
    filter: &ChangeFilter,
    policy: &ErrorPolicy,
    reader: &Store<K>,
) -> Option<K> {
    match event {
        watcher::Event::Apply(resource) | watcher::Event::InitApply(resource) => {
            filter.admit(&resource).then_some(resource)
        }
        watcher::Event::Delete(resource) => {
            let key = resource.resource_key();
            filter.forget(&key);
            policy.reset(&key);
            None
        }
        watcher::Event::InitDone => {
            // Relist completed: deletions missed while disconnected are pruned here
            let live: HashSet<String> = reader.state().iter().map(|r| r.resource_key()).collect();
            filter.retain_live(&live);
            policy.retain_live(&live);
            None
        }
        watcher::Event::Init => None,
    }
}

/// Per-controller options
#[derive(Debug, Clone)]
pub struct WatchOptions {
    pub worker_concurrency: u16,
    /// Annotation changes trigger runs
    pub watch_annotations: bool,
    pub error_backoff_min_minutes: u64,
    pub error_backoff_max_minutes: u64,
}

impl WatchOptions {
    pub fn from_config(config: &ControllerConfig, watch_annotations: bool) -> Self {
        Self {
            worker_concurrency: config.worker_concurrency,
            watch_annotations,
            error_backoff_min_minutes: config.error_backoff_min_minutes,
            error_backoff_max_minutes: config.error_backoff_max_minutes,
        }
    }
}

struct WatchContext<R> {
    reconciler: Arc<R>,
    policy: Arc<ErrorPolicy>,
    cancel: CancellationToken,
}

async fn reconcile<K, R>(
    resource: Arc<K>,
    ctx: Arc<WatchContext<R>>,
) -> Result<Action, ReconcileError>
where
    K: Converged,
    R: Reconcile<K>,
{
    let key = resource.resource_key();
    let requeue = ctx
        .reconciler
        .reconcile(K::clone(&resource), &ctx.cancel)
        .await?;
    ctx.policy.reset(&key);
    Ok(match requeue {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    })
}

fn error_policy<K, R>(
    resource: Arc<K>,
    error: &ReconcileError,
    ctx: Arc<WatchContext<R>>,
) -> Action
where
    K: Converged,
{
    match ctx.policy.on_error(&resource.resource_key(), error) {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    }
}

/// Run `reconciler` over every object of `K` visible to `api` until `shutdown`.
///
/// `related` adds watches on other kinds whose changes must re-run objects of
/// `K`; those triggers bypass the change filter.
pub async fn run_controller<K, R, F>(
    api: Api<K>,
    reconciler: Arc<R>,
    options: WatchOptions,
    metrics: Arc<ControllerMetrics>,
    shutdown: CancellationToken,
    related: F,
) where
    K: Converged,
    R: Reconcile<K>,
    F: FnOnce(Controller<K>) -> Controller<K>,
{
    let kind = reconciler.kind();
    let span = info_span!("controller.watch", resource.kind = kind);
    async move {
        let (reader, writer) = reflector::store();
        let filter = ChangeFilter::new(options.watch_annotations);
        let policy = Arc::new(ErrorPolicy::new(
            kind,
            options.error_backoff_min_minutes,
            options.error_backoff_max_minutes,
            metrics,
        ));
        let trigger_policy = Arc::clone(&policy);
        let trigger_reader = reader.clone();
        let trigger = watcher(api, watcher::Config::default())
            .default_backoff()
            .reflect(writer)
            .try_filter_map(move |event| {
                future::ready(Ok(route(event, &filter, &trigger_policy, &trigger_reader)))
            });

        let ctx = Arc::new(WatchContext {
            reconciler,
            policy,
            cancel: shutdown.child_token(),
        });

        info!(workers = options.worker_concurrency, "controller.starting");
        related(Controller::for_stream(trigger, reader))
            .with_config(controller::Config::default().concurrency(options.worker_concurrency))
            .graceful_shutdown_on(shutdown.cancelled_owned())
            .run(reconcile::<K, R>, error_policy::<K, R>, ctx)
            .for_each(|result| async move {
                match result {
                    Ok((object, action)) => {
                        debug!(object = %object.name, ?action, "controller.reconciled");
                    }
                    Err(controller::Error::ReconcilerFailed(e, object)) => {
                        debug!(object = %object.name, error = %e, "controller.reconcile_failed");
                    }
                    Err(e) => log_watch_error(kind, &e.to_string()),
                }
            })
            .await;
        info!("controller.stopped");
    }
    .instrument(span)
    .await;
}

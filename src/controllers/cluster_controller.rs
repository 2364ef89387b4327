//! DbCluster controller
//!
//! Watches DbCluster resources directly and the StatefulSets and Services
//! they control through owner indirection, then drains the resulting keys
//! with a pool of workers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::NamespaceResourceScope;
use kube::api::ListParams;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, Resource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::controllers::Context;
use crate::crd::DbCluster;
use crate::error::{Disposition, Error, Result};
use crate::identity::{ObjectHandle, ObjectKey, MANAGED_BY, MANAGED_BY_LABEL};
use crate::metrics;
use crate::reconcilers::cluster::ClusterReconciler;
use crate::router::{
    watch_for_controller, watch_for_object, GetControllerFn, Informer, Lister, WorkQueue,
};
use crate::update::KubeStore;

const KIND: &str = "DbCluster";

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn managed_by_filter() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string())])
}

/// Resolve controller candidates from the DbCluster cache
pub fn cluster_lookup(clusters: Lister<DbCluster>) -> GetControllerFn {
    Arc::new(move |namespace: &str, name: &str| -> Result<Arc<dyn ObjectHandle>> {
        clusters
            .get(namespace, name)
            .map(|cluster| cluster as Arc<dyn ObjectHandle>)
            .ok_or_else(|| Error::not_found(KIND, ObjectKey::new(namespace, name).to_string()))
    })
}

/// Run the DbCluster controller until `shutdown` is cancelled
pub async fn run(ctx: Arc<Context>, shutdown: CancellationToken) {
    let namespace = ctx.config.namespace();
    let clusters: Api<DbCluster> = api(&ctx.client, namespace);

    // Verify CRD is installed
    if let Err(e) = clusters.list(&ListParams::default().limit(1)).await {
        error!("DbCluster CRD not installed: {}", e);
        return;
    }

    info!(workers = ctx.config.workers, "Starting DbCluster controller");

    let queue = WorkQueue::new("dbcluster");
    let label_selector = format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY);

    let mut cluster_informer: Informer<DbCluster> = Informer::new();
    watch_for_object(&mut cluster_informer, queue.clone());
    let lister = cluster_informer.lister();

    let mut sts_informer: Informer<StatefulSet> = Informer::new();
    watch_for_controller(
        &mut sts_informer,
        queue.clone(),
        ctx.scheme.clone(),
        cluster_lookup(lister.clone()),
        Some(managed_by_filter()),
    );
    let mut svc_informer: Informer<Service> = Informer::new();
    watch_for_controller(
        &mut svc_informer,
        queue.clone(),
        ctx.scheme.clone(),
        cluster_lookup(lister.clone()),
        Some(managed_by_filter()),
    );

    let informers = vec![
        tokio::spawn(cluster_informer.run(clusters, WatcherConfig::default())),
        tokio::spawn(sts_informer.run(
            api(&ctx.client, namespace),
            WatcherConfig::default().labels(&label_selector),
        )),
        tokio::spawn(svc_informer.run(
            api(&ctx.client, namespace),
            WatcherConfig::default().labels(&label_selector),
        )),
    ];

    let reconciler = Arc::new(ClusterReconciler::new(
        ctx.pd_control.clone(),
        Arc::new(KubeStore::<DbCluster>::status(ctx.client.clone())),
    ));
    let resync = ctx.config.resync_period();
    let workers: Vec<_> = (0..ctx.config.workers.max(1))
        .map(|id| {
            tokio::spawn(worker(
                id,
                queue.clone(),
                lister.clone(),
                reconciler.clone(),
                resync,
            ))
        })
        .collect();

    shutdown.cancelled().await;
    info!("Stopping DbCluster controller");
    queue.shut_down();
    for informer in &informers {
        informer.abort();
    }
    for handle in workers {
        if let Err(e) = handle.await {
            warn!(error = %e, "Worker task failed");
        }
    }
}

async fn worker(
    id: usize,
    queue: WorkQueue<ObjectKey>,
    lister: Lister<DbCluster>,
    reconciler: Arc<ClusterReconciler>,
    resync: Duration,
) {
    debug!(worker = id, "Worker started");
    while let Some(key) = queue.get().await {
        process_key(&queue, &lister, &reconciler, &key, resync).await;
        queue.done(&key);
    }
    debug!(worker = id, "Worker stopped");
}

/// Reconcile one key and schedule its next pass according to the outcome
///
/// The caller owns the key and must call [`WorkQueue::done`] afterwards.
pub async fn process_key(
    queue: &WorkQueue<ObjectKey>,
    lister: &Lister<DbCluster>,
    reconciler: &ClusterReconciler,
    key: &ObjectKey,
    resync: Duration,
) {
    let Some(cluster) = lister.get(key.namespace.as_deref().unwrap_or_default(), &key.name) else {
        debug!(key = %key, "DbCluster no longer exists");
        reconciler.release_clients(key);
        queue.forget(key);
        return;
    };

    let _timer = metrics::RECONCILE_DURATION
        .with_label_values(&[KIND])
        .start_timer();
    metrics::RECONCILIATIONS.with_label_values(&[KIND]).inc();

    let Err(e) = reconciler.reconcile(&cluster).await else {
        queue.forget(key);
        queue.add_after(key.clone(), resync);
        return;
    };

    match e.disposition() {
        Disposition::Requeue => {
            info!(key = %key, reason = %e, "Requeueing DbCluster");
            metrics::REQUEUES.with_label_values(&[KIND]).inc();
            queue.add_rate_limited(key.clone());
        }
        Disposition::Ignore => {
            debug!(key = %key, reason = %e, "Ignoring DbCluster");
            metrics::IGNORED.with_label_values(&[KIND]).inc();
            queue.forget(key);
        }
        Disposition::Fail => {
            error!(key = %key, error = %e, "Reconciliation error");
            metrics::RECONCILIATION_ERRORS
                .with_label_values(&[KIND])
                .inc();
            queue.add_rate_limited(key.clone());
        }
    }
}

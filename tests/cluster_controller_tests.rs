//! Integration tests for the DbCluster work-queue driver
//!
//! Watch events are fed straight into informers; the driver runs against
//! fake PD clients and an in-memory status store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::runtime::watcher::Event;
use kube::ResourceExt;
use parking_lot::Mutex;

use db_cluster_operator::controllers::cluster_controller::{cluster_lookup, process_key};
use db_cluster_operator::crd::{DbCluster, DbClusterSpec, PdSpec};
use db_cluster_operator::identity::{
    cluster_owner_ref, default_scheme, ObjectKey, MANAGED_BY, MANAGED_BY_LABEL,
};
use db_cluster_operator::pd::fake::FakePdControl;
use db_cluster_operator::pd::{HealthInfo, MemberHealth};
use db_cluster_operator::reconcilers::cluster::ClusterReconciler;
use db_cluster_operator::router::{watch_for_controller, watch_for_object, Informer, WorkQueue};
use db_cluster_operator::update::RecordStore;
use db_cluster_operator::{Error, Result};

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Default)]
struct MemoryStore {
    objects: Mutex<BTreeMap<String, DbCluster>>,
}

impl MemoryStore {
    fn insert(&self, cluster: &DbCluster) {
        let key = ObjectKey::from_meta(&cluster.metadata).unwrap().to_string();
        self.objects.lock().insert(key, cluster.clone());
    }

    fn get_status(&self, key: &str) -> Option<db_cluster_operator::crd::DbClusterStatus> {
        self.objects.lock().get(key).and_then(|c| c.status.clone())
    }
}

#[async_trait]
impl RecordStore<DbCluster> for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<DbCluster> {
        self.objects
            .lock()
            .get(&key.to_string())
            .cloned()
            .ok_or_else(|| Error::not_found("DbCluster", key.to_string()))
    }

    async fn update(&self, obj: &DbCluster) -> Result<DbCluster> {
        self.insert(obj);
        Ok(obj.clone())
    }
}

fn cluster(name: &str, paused: bool) -> DbCluster {
    let mut dc = DbCluster::new(
        name,
        DbClusterSpec {
            pd: Some(PdSpec {
                replicas: 1,
                image: None,
            }),
            paused,
            ..Default::default()
        },
    );
    dc.metadata.namespace = Some("db".into());
    dc.metadata.uid = Some(format!("uid-{name}"));
    dc
}

fn owned_statefulset(owner: &DbCluster) -> StatefulSet {
    let mut sts = StatefulSet::default();
    sts.metadata.name = Some(format!("{}-pd", owner.name_any()));
    sts.metadata.namespace = owner.namespace();
    sts.metadata.owner_references = Some(vec![cluster_owner_ref(owner)]);
    sts.metadata.labels = Some(BTreeMap::from([(
        MANAGED_BY_LABEL.to_string(),
        MANAGED_BY.to_string(),
    )]));
    sts
}

struct Harness {
    queue: WorkQueue<ObjectKey>,
    clusters: Informer<DbCluster>,
    statefulsets: Informer<StatefulSet>,
    control: Arc<FakePdControl>,
    store: Arc<MemoryStore>,
    reconciler: ClusterReconciler,
}

impl Harness {
    fn new() -> Self {
        let queue = WorkQueue::new("test");
        let mut clusters: Informer<DbCluster> = Informer::new();
        watch_for_object(&mut clusters, queue.clone());
        let mut statefulsets: Informer<StatefulSet> = Informer::new();
        watch_for_controller(
            &mut statefulsets,
            queue.clone(),
            Arc::new(default_scheme()),
            cluster_lookup(clusters.lister()),
            Some(BTreeMap::from([(
                MANAGED_BY_LABEL.to_string(),
                MANAGED_BY.to_string(),
            )])),
        );
        let control = Arc::new(FakePdControl::new());
        let store = Arc::new(MemoryStore::default());
        let reconciler = ClusterReconciler::new(control.clone(), store.clone());
        Self {
            queue,
            clusters,
            statefulsets,
            control,
            store,
            reconciler,
        }
    }

    fn apply_cluster(&mut self, dc: DbCluster) {
        self.store.insert(&dc);
        self.clusters.handle(Event::Apply(dc));
    }

    async fn drain_one(&self) -> ObjectKey {
        let key = self.queue.get().await.unwrap();
        process_key(
            &self.queue,
            &self.clusters.lister(),
            &self.reconciler,
            &key,
            Duration::from_secs(300),
        )
        .await;
        self.queue.done(&key);
        key
    }
}

// ============================================================================
// Driver Tests
// ============================================================================

#[tokio::test]
async fn test_dependent_events_route_to_owning_cluster() {
    let mut h = Harness::new();
    let demo = cluster("demo", false);
    h.apply_cluster(demo.clone());
    assert_eq!(h.queue.get().await, Some(ObjectKey::new("db", "demo")));
    h.queue.done(&ObjectKey::new("db", "demo"));

    h.statefulsets.handle(Event::Apply(owned_statefulset(&demo)));
    h.statefulsets.handle(Event::Apply(owned_statefulset(&demo)));

    assert_eq!(h.queue.len(), 1);
    assert_eq!(h.queue.get().await, Some(ObjectKey::new("db", "demo")));
}

#[tokio::test]
async fn test_dependent_of_unknown_cluster_is_dropped() {
    let mut h = Harness::new();
    let ghost = cluster("ghost", false);

    h.statefulsets.handle(Event::Apply(owned_statefulset(&ghost)));

    assert!(h.queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_healthy_cluster_is_resynced() {
    let mut h = Harness::new();
    h.control.register_pd("db", "demo").set_health_info(HealthInfo {
        healths: vec![MemberHealth {
            name: "demo-pd-0".into(),
            member_id: 1,
            client_urls: vec!["http://demo-pd-0:2379".into()],
            health: true,
        }],
    });
    h.apply_cluster(cluster("demo", false));

    let key = h.drain_one().await;

    let status = h.store.get_status("db/demo").unwrap();
    assert_eq!(status.phase.as_deref(), Some("Running"));
    assert_eq!(h.queue.num_requeues(&key), 0);
    assert!(h.queue.is_empty());

    tokio::time::sleep(Duration::from_secs(301)).await;
    assert_eq!(h.queue.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_pd_is_rate_limited() {
    let mut h = Harness::new();
    h.apply_cluster(cluster("demo", false));

    let key = h.drain_one().await;

    assert_eq!(h.queue.num_requeues(&key), 1);
    let status = h.store.get_status("db/demo").unwrap();
    assert_eq!(status.phase.as_deref(), Some("Unavailable"));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.queue.len(), 1);
}

#[tokio::test]
async fn test_paused_cluster_is_forgotten() {
    let mut h = Harness::new();
    h.apply_cluster(cluster("demo", true));

    let key = h.drain_one().await;

    assert_eq!(h.queue.num_requeues(&key), 0);
    assert!(h.queue.is_empty());
    assert!(h.store.get_status("db/demo").is_none());
    assert!(h.control.probe_log().is_empty());
}

#[tokio::test]
async fn test_deleted_cluster_is_skipped() {
    let mut h = Harness::new();
    let demo = cluster("demo", false);
    h.apply_cluster(demo.clone());
    h.clusters.handle(Event::Delete(demo));

    h.drain_one().await;

    assert!(h.control.requested_targets().is_empty());
}

#[tokio::test]
async fn test_deleted_cluster_releases_pd_clients() {
    let mut h = Harness::new();
    h.control.register_pd("db", "demo");
    h.control.register_pd("db", "other");
    h.control.register_pdms("db", "demo", "tso");
    let demo = cluster("demo", false);
    h.apply_cluster(demo.clone());
    h.drain_one().await;
    assert_eq!(h.control.cached_clients(), 3);

    h.clusters.handle(Event::Delete(demo));
    let key = h.drain_one().await;

    assert_eq!(h.control.cached_clients(), 1);
    assert_eq!(
        h.control.invalidations(),
        [("db".to_string(), "demo".to_string())]
    );
    assert_eq!(h.queue.num_requeues(&key), 0);
}

//! In-memory PD clients for tests
//!
//! Every fake client records its health probes in a log shared with the
//! [`FakePdControl`] that created it, so tests can assert probe order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};

use super::client::{ClientTarget, HealthInfo, PdClient, PdControl, PdmsClient};

type ProbeLog = Arc<Mutex<Vec<String>>>;

/// Fake PD client with switchable health
pub struct FakePdClient {
    url: String,
    healthy: AtomicBool,
    probes: AtomicUsize,
    health: Mutex<HealthInfo>,
    service_members: Mutex<HashMap<String, Vec<String>>>,
    log: ProbeLog,
}

impl FakePdClient {
    fn new(url: &str, healthy: bool, log: ProbeLog) -> Self {
        Self {
            url: url.to_string(),
            healthy: AtomicBool::new(healthy),
            probes: AtomicUsize::new(0),
            health: Mutex::new(HealthInfo::default()),
            service_members: Mutex::new(HashMap::new()),
            log,
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Payload returned by `get_health` while healthy
    pub fn set_health_info(&self, info: HealthInfo) {
        *self.health.lock() = info;
    }

    /// Members PD reports for sub-service `service`; unset services fail
    pub fn set_service_members(&self, service: &str, urls: &[&str]) {
        self.service_members.lock().insert(
            service.to_string(),
            urls.iter().map(|u| u.to_string()).collect(),
        );
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    fn unavailable(&self) -> Error {
        Error::PdStatus {
            url: self.url.clone(),
            status: 503,
        }
    }
}

#[async_trait]
impl PdClient for FakePdClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_health(&self) -> Result<HealthInfo> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(self.url.clone());
        if self.healthy.load(Ordering::SeqCst) {
            Ok(self.health.lock().clone())
        } else {
            Err(self.unavailable())
        }
    }

    async fn get_service_members(&self, service: &str) -> Result<Vec<String>> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(self.unavailable());
        }
        self.service_members
            .lock()
            .get(service)
            .cloned()
            .ok_or_else(|| Error::PdStatus {
                url: format!("{}/{}", self.url, service),
                status: 404,
            })
    }
}

/// Fake PD sub-service client
pub struct FakePdmsClient {
    url: String,
    healthy: AtomicBool,
    probes: AtomicUsize,
    log: ProbeLog,
}

impl FakePdmsClient {
    fn new(url: &str, healthy: bool, log: ProbeLog) -> Self {
        Self {
            url: url.to_string(),
            healthy: AtomicBool::new(healthy),
            probes: AtomicUsize::new(0),
            log,
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PdmsClient for FakePdmsClient {
    fn url(&self) -> &str {
        &self.url
    }

    async fn get_health(&self) -> Result<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.log.lock().push(self.url.clone());
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::PdStatus {
                url: self.url.clone(),
                status: 503,
            })
        }
    }
}

/// (namespace, cluster, service, cluster domain)
type FakeKey = (String, String, Option<String>, Option<String>);

/// [`PdControl`] handing out registered fakes
///
/// Service-level fakes are looked up by namespace, cluster, sub-service and
/// cluster domain; pinned fakes by URL. Unregistered targets get a fresh
/// unhealthy client that is remembered for later lookups.
#[derive(Default)]
pub struct FakePdControl {
    pd: Mutex<HashMap<FakeKey, Arc<FakePdClient>>>,
    pd_by_url: Mutex<HashMap<String, Arc<FakePdClient>>>,
    pdms: Mutex<HashMap<FakeKey, Arc<FakePdmsClient>>>,
    pdms_by_url: Mutex<HashMap<String, Arc<FakePdmsClient>>>,
    requests: Mutex<Vec<ClientTarget>>,
    invalidations: Mutex<Vec<(String, String)>>,
    log: ProbeLog,
}

fn fake_key(namespace: &str, cluster: &str, service: Option<&str>, domain: Option<&str>) -> FakeKey {
    (
        namespace.to_string(),
        cluster.to_string(),
        service.map(str::to_string),
        domain.filter(|d| !d.is_empty()).map(str::to_string),
    )
}

fn target_key(target: &ClientTarget) -> FakeKey {
    let key = &target.key;
    fake_key(
        &key.namespace,
        &key.cluster,
        key.service.as_deref(),
        key.cluster_domain.as_deref(),
    )
}

impl FakePdControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the healthy service-level PD client of a cluster
    pub fn register_pd(&self, namespace: &str, cluster: &str) -> Arc<FakePdClient> {
        self.register_pd_with_domain(namespace, cluster, None)
    }

    pub fn register_pd_with_domain(
        &self,
        namespace: &str,
        cluster: &str,
        domain: Option<&str>,
    ) -> Arc<FakePdClient> {
        let target = ClientTarget::new(namespace, cluster, false).cluster_domain(domain);
        let client = Arc::new(FakePdClient::new(&target.url(), true, self.log.clone()));
        self.pd
            .lock()
            .insert(fake_key(namespace, cluster, None, domain), client.clone());
        client
    }

    /// Register a healthy PD client pinned to a member URL
    pub fn register_pd_address(&self, url: &str) -> Arc<FakePdClient> {
        let client = Arc::new(FakePdClient::new(url, true, self.log.clone()));
        self.pd_by_url.lock().insert(url.to_string(), client.clone());
        client
    }

    pub fn register_pdms(&self, namespace: &str, cluster: &str, service: &str) -> Arc<FakePdmsClient> {
        let target = ClientTarget::new(namespace, cluster, false).service(service);
        let client = Arc::new(FakePdmsClient::new(&target.url(), true, self.log.clone()));
        self.pdms
            .lock()
            .insert(fake_key(namespace, cluster, Some(service), None), client.clone());
        client
    }

    pub fn register_pdms_address(&self, url: &str) -> Arc<FakePdmsClient> {
        let client = Arc::new(FakePdmsClient::new(url, true, self.log.clone()));
        self.pdms_by_url.lock().insert(url.to_string(), client.clone());
        client
    }

    /// URLs of every health probe, in order
    pub fn probe_log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    /// Every target a client was requested for, in order
    pub fn requested_targets(&self) -> Vec<ClientTarget> {
        self.requests.lock().clone()
    }

    /// Number of service-level fakes currently handed out per key
    pub fn cached_clients(&self) -> usize {
        self.pd.lock().len() + self.pdms.lock().len()
    }

    /// `(namespace, cluster)` of every invalidation, in order
    pub fn invalidations(&self) -> Vec<(String, String)> {
        self.invalidations.lock().clone()
    }

    fn fake_pd(&self, target: &ClientTarget) -> Arc<FakePdClient> {
        if let Some(endpoint) = &target.endpoint {
            return self
                .pd_by_url
                .lock()
                .entry(endpoint.url.clone())
                .or_insert_with(|| Arc::new(FakePdClient::new(&endpoint.url, false, self.log.clone())))
                .clone();
        }
        self.pd
            .lock()
            .entry(target_key(target))
            .or_insert_with(|| Arc::new(FakePdClient::new(&target.url(), false, self.log.clone())))
            .clone()
    }

    fn fake_pdms(&self, target: &ClientTarget) -> Arc<FakePdmsClient> {
        if let Some(endpoint) = &target.endpoint {
            return self
                .pdms_by_url
                .lock()
                .entry(endpoint.url.clone())
                .or_insert_with(|| Arc::new(FakePdmsClient::new(&endpoint.url, false, self.log.clone())))
                .clone();
        }
        self.pdms
            .lock()
            .entry(target_key(target))
            .or_insert_with(|| Arc::new(FakePdmsClient::new(&target.url(), false, self.log.clone())))
            .clone()
    }
}

impl PdControl for FakePdControl {
    fn pd_client(&self, target: &ClientTarget) -> Arc<dyn PdClient> {
        self.requests.lock().push(target.clone());
        self.fake_pd(target)
    }

    fn pdms_client(&self, target: &ClientTarget) -> Arc<dyn PdmsClient> {
        self.requests.lock().push(target.clone());
        self.fake_pdms(target)
    }

    fn invalidate_cluster(&self, namespace: &str, cluster: &str) {
        let keep = |key: &FakeKey| key.0 != namespace || key.1 != cluster;
        self.pd.lock().retain(|key, _| keep(key));
        self.pdms.lock().retain(|key, _| keep(key));
        self.invalidations
            .lock()
            .push((namespace.to_string(), cluster.to_string()));
    }
}

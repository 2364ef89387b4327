//! Process-wide PD client cache

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

use super::client::{ClientKey, ClientTarget, PdClient, PdControl, PdmsClient};
use super::http::{HttpPdClient, HttpPdmsClient, TlsSource};

/// [`PdControl`] backed by HTTP clients
///
/// Created once at startup and handed to every worker. Service-level
/// clients are cached per [`ClientKey`] until the cluster they involve is
/// invalidated; pinned member clients bypass the cache so one worker's
/// failover choice never leaks to other callers.
pub struct DefaultPdControl {
    kube: kube::Client,
    timeout: Duration,
    pd: DashMap<ClientKey, Arc<dyn PdClient>>,
    pdms: DashMap<ClientKey, Arc<dyn PdmsClient>>,
}

impl DefaultPdControl {
    pub fn new(kube: kube::Client, timeout: Duration) -> Self {
        Self {
            kube,
            timeout,
            pd: DashMap::new(),
            pdms: DashMap::new(),
        }
    }

    /// Number of cached service-level clients
    pub fn cached_clients(&self) -> usize {
        self.pd.len() + self.pdms.len()
    }

    fn tls_source(&self, target: &ClientTarget) -> Option<TlsSource> {
        target.key.tls.then(|| TlsSource {
            kube: self.kube.clone(),
            cert: target.cert_source(),
        })
    }

    fn build_pd(&self, target: &ClientTarget) -> Arc<dyn PdClient> {
        let url = target.url();
        debug!(url = %url, pinned = target.is_pinned(), "Creating PD client");
        Arc::new(HttpPdClient::new(url, self.timeout, self.tls_source(target)))
    }

    fn build_pdms(&self, target: &ClientTarget) -> Arc<dyn PdmsClient> {
        let url = target.url();
        let service = target.key.service.clone().unwrap_or_default();
        debug!(url = %url, service = %service, pinned = target.is_pinned(), "Creating PD sub-service client");
        Arc::new(HttpPdmsClient::new(
            service,
            url,
            self.timeout,
            self.tls_source(target),
        ))
    }
}

impl PdControl for DefaultPdControl {
    fn pd_client(&self, target: &ClientTarget) -> Arc<dyn PdClient> {
        if target.is_pinned() {
            return self.build_pd(target);
        }
        self.pd
            .entry(target.key.clone())
            .or_insert_with(|| self.build_pd(target))
            .value()
            .clone()
    }

    fn pdms_client(&self, target: &ClientTarget) -> Arc<dyn PdmsClient> {
        if target.is_pinned() {
            return self.build_pdms(target);
        }
        self.pdms
            .entry(target.key.clone())
            .or_insert_with(|| self.build_pdms(target))
            .value()
            .clone()
    }

    fn invalidate_cluster(&self, namespace: &str, cluster: &str) {
        let before = self.cached_clients();
        self.pd.retain(|key, _| !key.involves(namespace, cluster));
        self.pdms.retain(|key, _| !key.involves(namespace, cluster));
        debug!(
            namespace = %namespace,
            cluster = %cluster,
            dropped = before.saturating_sub(self.cached_clients()),
            "Invalidated PD clients"
        );
    }
}

//! PD client interfaces and client addressing

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Port PD and its sub-services serve their client API on
pub const CLIENT_PORT: u16 = 2379;

/// Health of one PD member as reported by `/pd/api/v1/health`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct MemberHealth {
    pub name: String,
    #[serde(default)]
    pub member_id: u64,
    #[serde(default)]
    pub client_urls: Vec<String>,
    pub health: bool,
}

/// Health of the whole PD cluster
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HealthInfo {
    pub healths: Vec<MemberHealth>,
}

impl HealthInfo {
    /// Every reported member is healthy
    pub fn all_healthy(&self) -> bool {
        !self.healths.is_empty() && self.healths.iter().all(|m| m.health)
    }
}

/// Client for the PD API of one cluster
#[async_trait]
pub trait PdClient: Send + Sync {
    /// Base URL requests are sent to
    fn url(&self) -> &str;

    /// Member health; an error means this endpoint is not usable
    async fn get_health(&self) -> Result<HealthInfo>;

    /// Client URLs of the members registered for sub-service `service`
    async fn get_service_members(&self, service: &str) -> Result<Vec<String>>;
}

/// Client for one PD sub-service (microservice mode)
#[async_trait]
pub trait PdmsClient: Send + Sync {
    fn url(&self) -> &str;

    async fn get_health(&self) -> Result<()>;
}

/// Source of PD clients
///
/// Service-level clients are shared per [`ClientKey`]; clients pinned to a
/// member endpoint are built per call and never shared.
pub trait PdControl: Send + Sync {
    fn pd_client(&self, target: &ClientTarget) -> Arc<dyn PdClient>;

    /// `target.key.service` names the sub-service
    fn pdms_client(&self, target: &ClientTarget) -> Arc<dyn PdmsClient>;

    /// Drop every shared client that addresses `cluster` or authenticates
    /// with its certificate
    fn invalidate_cluster(&self, namespace: &str, cluster: &str);
}

/// Identity of a shared service-level client
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub namespace: String,
    pub cluster: String,
    /// Sub-service name; `None` for PD itself
    pub service: Option<String>,
    pub cluster_domain: Option<String>,
    pub tls: bool,
    /// Address the headless peer service instead of the client service
    pub headless: bool,
    /// Cluster whose certificate authenticates TLS requests, when not the
    /// addressed cluster
    pub tls_cert_from: Option<CertSource>,
}

impl ClientKey {
    /// The client addresses `cluster` or borrows its certificate
    pub fn involves(&self, namespace: &str, cluster: &str) -> bool {
        let addresses = self.namespace == namespace && self.cluster == cluster;
        let authenticates = self
            .tls_cert_from
            .as_ref()
            .is_some_and(|c| c.namespace == namespace && c.cluster == cluster);
        addresses || authenticates
    }
}

/// Cluster whose client certificate secret authenticates TLS requests
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CertSource {
    pub namespace: String,
    pub cluster: String,
}

/// A specific member endpoint to talk to instead of the service
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PinnedEndpoint {
    pub name: String,
    pub url: String,
}

/// Everything needed to obtain a client
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientTarget {
    pub key: ClientKey,
    pub endpoint: Option<PinnedEndpoint>,
}

impl ClientTarget {
    pub fn new(namespace: &str, cluster: &str, tls: bool) -> Self {
        Self {
            key: ClientKey {
                namespace: namespace.to_string(),
                cluster: cluster.to_string(),
                service: None,
                cluster_domain: None,
                tls,
                headless: false,
                tls_cert_from: None,
            },
            endpoint: None,
        }
    }

    /// Address a sub-service instead of PD
    pub fn service(mut self, service: &str) -> Self {
        self.key.service = Some(service.to_string());
        self
    }

    /// Cluster domain suffix; empty means none
    pub fn cluster_domain(mut self, domain: Option<&str>) -> Self {
        self.key.cluster_domain = domain.filter(|d| !d.is_empty()).map(str::to_string);
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.key.headless = headless;
        self
    }

    /// Take TLS material from another cluster's client secret
    pub fn tls_cert_from(mut self, namespace: &str, cluster: &str) -> Self {
        self.key.tls_cert_from = Some(CertSource {
            namespace: namespace.to_string(),
            cluster: cluster.to_string(),
        });
        self
    }

    /// Talk to one member directly
    pub fn pinned(mut self, name: &str, url: &str) -> Self {
        self.endpoint = Some(PinnedEndpoint {
            name: name.to_string(),
            url: url.to_string(),
        });
        self
    }

    pub fn is_pinned(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Secret owner for TLS material, defaulting to the addressed cluster
    pub fn cert_source(&self) -> CertSource {
        self.key.tls_cert_from.clone().unwrap_or_else(|| CertSource {
            namespace: self.key.namespace.clone(),
            cluster: self.key.cluster.clone(),
        })
    }

    /// Base URL of the target
    pub fn url(&self) -> String {
        if let Some(endpoint) = &self.endpoint {
            return endpoint.url.trim_end_matches('/').to_string();
        }
        let key = &self.key;
        let scheme = if key.tls { "https" } else { "http" };
        let component = key.service.as_deref().unwrap_or("pd");
        let peer = if key.headless { "-peer" } else { "" };
        let host = format!("{}-{}{}.{}", key.cluster, component, peer, key.namespace);
        match &key.cluster_domain {
            Some(domain) => format!("{scheme}://{host}.svc.{domain}:{CLIENT_PORT}"),
            None => format!("{scheme}://{host}:{CLIENT_PORT}"),
        }
    }
}

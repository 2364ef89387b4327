//! HTTP(S) implementation of the PD clients

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Certificate, Identity};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Error, Result};

use super::client::{CertSource, HealthInfo, MemberHealth, PdClient, PdmsClient};
use super::tls;

const PD_HEALTH_PATH: &str = "pd/api/v1/health";
const PD_SERVICE_MEMBERS_PATH: &str = "pd/api/v2/ms/members";

/// One entry of PD's sub-service registry
#[derive(Debug, Deserialize)]
struct ServiceRegistryEntry {
    #[serde(rename = "service-addr")]
    service_addr: String,
}

/// Where TLS material comes from when the target speaks HTTPS
#[derive(Clone)]
pub struct TlsSource {
    pub kube: kube::Client,
    pub cert: CertSource,
}

/// Shared request plumbing
///
/// The underlying `reqwest::Client` is built on first use, so a missing TLS
/// secret surfaces as a request error instead of a construction error.
struct HttpTransport {
    url: String,
    timeout: Duration,
    tls: Option<TlsSource>,
    http: OnceCell<reqwest::Client>,
}

impl HttpTransport {
    fn new(url: String, timeout: Duration, tls: Option<TlsSource>) -> Self {
        Self {
            url,
            timeout,
            tls,
            http: OnceCell::new(),
        }
    }

    async fn http(&self) -> Result<&reqwest::Client> {
        self.http
            .get_or_try_init(|| build_http_client(self.timeout, self.tls.as_ref()))
            .await
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.url, path);
        debug!(url = %url, "PD request");
        let resp = self.http().await?.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::PdStatus {
                url,
                status: resp.status().as_u16(),
            });
        }
        Ok(resp)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(self.get(path).await?.json::<T>().await?)
    }
}

async fn build_http_client(timeout: Duration, tls: Option<&TlsSource>) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().timeout(timeout);
    if let Some(tls) = tls {
        let creds = tls::load_client_tls(&tls.kube, &tls.cert).await?;
        let ca = Certificate::from_pem(creds.ca_cert.as_bytes())
            .map_err(|e| Error::Tls(format!("invalid CA certificate: {}", e)))?;
        let pem = format!("{}\n{}", creds.client_cert, creds.client_key);
        let identity = Identity::from_pem(pem.as_bytes())
            .map_err(|e| Error::Tls(format!("invalid client certificate: {}", e)))?;
        builder = builder
            .add_root_certificate(ca)
            .identity(identity)
            .https_only(true);
    }
    Ok(builder.build()?)
}

/// PD client speaking the PD HTTP API
pub struct HttpPdClient {
    transport: HttpTransport,
}

impl HttpPdClient {
    pub fn new(url: String, timeout: Duration, tls: Option<TlsSource>) -> Self {
        Self {
            transport: HttpTransport::new(url, timeout, tls),
        }
    }
}

#[async_trait]
impl PdClient for HttpPdClient {
    fn url(&self) -> &str {
        &self.transport.url
    }

    async fn get_health(&self) -> Result<HealthInfo> {
        let healths: Vec<MemberHealth> = self.transport.get_json(PD_HEALTH_PATH).await?;
        Ok(HealthInfo { healths })
    }

    async fn get_service_members(&self, service: &str) -> Result<Vec<String>> {
        let path = format!("{}/{}", PD_SERVICE_MEMBERS_PATH, service);
        let entries: Vec<ServiceRegistryEntry> = self.transport.get_json(&path).await?;
        Ok(entries.into_iter().map(|e| e.service_addr).collect())
    }
}

/// Client for one PD sub-service
pub struct HttpPdmsClient {
    service: String,
    transport: HttpTransport,
}

impl HttpPdmsClient {
    pub fn new(service: String, url: String, timeout: Duration, tls: Option<TlsSource>) -> Self {
        Self {
            service,
            transport: HttpTransport::new(url, timeout, tls),
        }
    }
}

#[async_trait]
impl PdmsClient for HttpPdmsClient {
    fn url(&self) -> &str {
        &self.transport.url
    }

    async fn get_health(&self) -> Result<()> {
        let path = format!("{}/api/v1/health", self.service);
        self.transport.get(&path).await.map(|_| ())
    }
}

//! PD client resolution with member failover
//!
//! Resolution never fails: when neither the service nor any known member
//! answers a health probe, the service-level client is returned and the
//! caller's own request reports the outage. A resolver that is temporarily
//! unable to reach PD must not stall the reconcile loop.

mod descriptor;

pub use descriptor::*;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::metrics;
use crate::pd::{ClientTarget, PdClient, PdControl, PdmsClient};

/// Target of the service-level PD client for `desc`
///
/// A heterogeneous cluster without a PD of its own addresses its parent's
/// PD, authenticating with its own client certificate.
pub fn pd_target(desc: &ClusterDescriptor) -> ClientTarget {
    service_target(desc, None)
}

/// Target of the service-level client for sub-service `service`
pub fn pdms_target(desc: &ClusterDescriptor, service: &str) -> ClientTarget {
    service_target(desc, Some(service))
}

fn service_target(desc: &ClusterDescriptor, service: Option<&str>) -> ClientTarget {
    let target = match desc.parent.as_ref().filter(|_| desc.borrows_parent_pd()) {
        Some(parent) => ClientTarget::new(&parent.namespace, &parent.name, desc.tls_enabled)
            .tls_cert_from(&desc.namespace, &desc.name)
            .cluster_domain(parent.cluster_domain.as_deref())
            .headless(desc.across_k8s),
        // cluster domain may be empty
        None => ClientTarget::new(&desc.namespace, &desc.name, desc.tls_enabled)
            .cluster_domain(desc.cluster_domain.as_deref()),
    };
    match service {
        Some(service) => target.service(service),
        None => target,
    }
}

fn member_target(desc: &ClusterDescriptor, name: &str, url: &str) -> ClientTarget {
    ClientTarget::new(&desc.namespace, &desc.name, desc.tls_enabled).pinned(name, url)
}

/// A PD client for `desc`, preferring one that answers
///
/// With no known peer members the service client is returned unprobed.
/// Otherwise the service client is probed, then each peer member in stored
/// order; the first healthy one wins.
pub async fn resolve_pd_client(
    control: &dyn PdControl,
    desc: &ClusterDescriptor,
) -> Arc<dyn PdClient> {
    let client = control.pd_client(&pd_target(desc));

    if desc.peer_members.is_empty() {
        return client;
    }

    match client.get_health().await {
        Ok(_) => return client,
        Err(e) => {
            warn!(
                cluster = %desc.name,
                namespace = %desc.namespace,
                url = %client.url(),
                error = %e,
                "PD service unhealthy, trying peer members"
            );
            metrics::PD_PROBE_FAILURES.with_label_values(&["pd"]).inc();
        }
    }

    for member in &desc.peer_members {
        let peer = control.pd_client(&member_target(desc, &member.name, &member.client_url));
        match peer.get_health().await {
            Ok(_) => {
                debug!(cluster = %desc.name, member = %member.name, "Using PD peer member");
                metrics::PD_FAILOVERS.with_label_values(&["pd"]).inc();
                return peer;
            }
            Err(e) => {
                debug!(member = %member.name, error = %e, "PD peer member unhealthy");
                metrics::PD_PROBE_FAILURES.with_label_values(&["pd-member"]).inc();
            }
        }
    }

    warn!(
        cluster = %desc.name,
        namespace = %desc.namespace,
        "No healthy PD endpoint found, using service client"
    );
    client
}

/// A client pinned to one PD member, `None` without a member
pub fn pd_client_for_member(
    control: &dyn PdControl,
    desc: &ClusterDescriptor,
    member: Option<&MemberEndpoint>,
) -> Option<Arc<dyn PdClient>> {
    let member = member?;
    Some(control.pd_client(&member_target(desc, &member.name, &member.client_url)))
}

/// A healthy client for sub-service `service`, `None` if nothing answers
///
/// Unlike [`resolve_pd_client`] the service client is always probed and a
/// total outage yields `None`: sub-services are optional and callers treat
/// the absence as "currently unavailable".
pub async fn resolve_pdms_client(
    control: &dyn PdControl,
    desc: &ClusterDescriptor,
    service: &str,
) -> Option<Arc<dyn PdmsClient>> {
    let client = control.pdms_client(&pdms_target(desc, service));
    match client.get_health().await {
        Ok(()) => return Some(client),
        Err(e) => {
            debug!(cluster = %desc.name, service = %service, error = %e, "PD sub-service unhealthy");
            metrics::PD_PROBE_FAILURES.with_label_values(&["pdms"]).inc();
        }
    }

    for member in desc.service_members(service) {
        let target = member_target(desc, member, member).service(service);
        let peer = control.pdms_client(&target);
        if peer.get_health().await.is_ok() {
            metrics::PD_FAILOVERS.with_label_values(&["pdms"]).inc();
            return Some(peer);
        }
        metrics::PD_PROBE_FAILURES.with_label_values(&["pdms-member"]).inc();
    }

    warn!(cluster = %desc.name, service = %service, "No healthy PD sub-service member found");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_target() {
        let mut desc = ClusterDescriptor::new("db", "demo");
        desc.cluster_domain = Some("c1.local".into());
        desc.tls_enabled = true;

        let target = pd_target(&desc);
        assert_eq!(target.key.namespace, "db");
        assert_eq!(target.key.cluster, "demo");
        assert_eq!(target.key.cluster_domain.as_deref(), Some("c1.local"));
        assert!(target.key.tls);
        assert!(target.key.tls_cert_from.is_none());
        assert!(!target.key.headless);
    }

    #[test]
    fn test_heterogeneous_target_uses_parent() {
        let mut desc = ClusterDescriptor::new("edge-ns", "edge");
        desc.local_pd = false;
        desc.across_k8s = true;
        desc.tls_enabled = true;
        desc.cluster_domain = Some("ignored.local".into());
        desc.parent = Some(ParentCluster {
            namespace: "db".into(),
            name: "demo".into(),
            cluster_domain: Some("c2.local".into()),
        });

        let target = pdms_target(&desc, "tso");
        assert_eq!(target.key.namespace, "db");
        assert_eq!(target.key.cluster, "demo");
        assert_eq!(target.key.service.as_deref(), Some("tso"));
        assert_eq!(target.key.cluster_domain.as_deref(), Some("c2.local"));
        assert!(target.key.headless);
        let cert = target.key.tls_cert_from.unwrap();
        assert_eq!((cert.namespace.as_str(), cert.cluster.as_str()), ("edge-ns", "edge"));
    }

    #[test]
    fn test_heterogeneous_with_local_pd_uses_own_service() {
        let mut desc = ClusterDescriptor::new("db", "edge");
        desc.parent = Some(ParentCluster {
            namespace: "db".into(),
            name: "demo".into(),
            cluster_domain: None,
        });

        assert_eq!(pd_target(&desc).key.cluster, "edge");
    }
}

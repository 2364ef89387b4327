//! The cluster facts PD client resolution depends on

use kube::ResourceExt;

use crate::crd::DbCluster;

/// Cluster whose PD a heterogeneous cluster borrows
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParentCluster {
    pub namespace: String,
    pub name: String,
    pub cluster_domain: Option<String>,
}

/// Known alternate address of a PD member
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberEndpoint {
    pub name: String,
    pub client_url: String,
}

/// Known members of one PD sub-service
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceMembers {
    pub name: String,
    /// Member client URLs
    pub members: Vec<String>,
}

/// Snapshot of a cluster taken at the start of a reconciliation pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterDescriptor {
    pub namespace: String,
    pub name: String,
    pub parent: Option<ParentCluster>,
    /// The cluster runs its own PD
    pub local_pd: bool,
    pub cluster_domain: Option<String>,
    pub tls_enabled: bool,
    /// Reach PD through headless peer services across Kubernetes clusters
    pub across_k8s: bool,
    /// Failover candidates, in last observed order
    pub peer_members: Vec<MemberEndpoint>,
    pub pdms: Vec<ServiceMembers>,
}

impl ClusterDescriptor {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            local_pd: true,
            ..Default::default()
        }
    }

    /// The cluster borrows the PD of its parent
    pub fn borrows_parent_pd(&self) -> bool {
        self.parent.is_some() && !self.local_pd
    }

    /// Known members of sub-service `service`
    pub fn service_members(&self, service: &str) -> &[String] {
        self.pdms
            .iter()
            .find(|s| s.name == service)
            .map(|s| s.members.as_slice())
            .unwrap_or_default()
    }
}

impl From<&DbCluster> for ClusterDescriptor {
    fn from(dc: &DbCluster) -> Self {
        let namespace = dc.namespace().unwrap_or_default();
        let parent = dc.spec.cluster.as_ref().map(|r| ParentCluster {
            namespace: if r.namespace.is_empty() {
                namespace.clone()
            } else {
                r.namespace.clone()
            },
            name: r.name.clone(),
            cluster_domain: r.cluster_domain.clone().filter(|d| !d.is_empty()),
        });
        let status = dc.status.clone().unwrap_or_default();

        Self {
            name: dc.name_any(),
            namespace,
            parent,
            local_pd: !dc.without_local_pd(),
            cluster_domain: dc.spec.cluster_domain.clone().filter(|d| !d.is_empty()),
            tls_enabled: dc.tls_cluster_enabled(),
            across_k8s: dc.spec.across_k8s,
            peer_members: status
                .pd
                .peer_members
                .into_iter()
                .map(|m| MemberEndpoint {
                    name: m.name,
                    client_url: m.client_url,
                })
                .collect(),
            pdms: status
                .pdms
                .into_iter()
                .map(|s| ServiceMembers {
                    name: s.name,
                    members: s.members,
                })
                .collect(),
        }
    }
}

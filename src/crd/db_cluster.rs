//! DbCluster Custom Resource Definition

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DbCluster resource specification
///
/// Only the fields the operator core consults are modelled here; component
/// sizing and images are consumed by the component reconcilers.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "db.oso.sh",
    version = "v1alpha1",
    kind = "DbCluster",
    plural = "dbclusters",
    singular = "dbcluster",
    shortname = "dbc",
    namespaced,
    status = "DbClusterStatus",
    printcolumn = r#"{"name": "PD Ready", "type": "boolean", "jsonPath": ".status.pd.healthy"}"#,
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DbClusterSpec {
    /// PD (placement driver) configuration; absent when the cluster borrows
    /// the PD of the cluster referenced by `cluster`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pd: Option<PdSpec>,

    /// PD sub-services (microservice mode)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pdms: Vec<PdmsSpec>,

    /// Parent cluster this cluster joins (heterogeneous deployment)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterRef>,

    /// Kubernetes cluster domain suffix, e.g. `cluster.local`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_domain: Option<String>,

    /// Route traffic through headless peer services across Kubernetes clusters
    #[serde(default)]
    pub across_k8s: bool,

    /// TLS between cluster components
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_cluster: Option<TlsCluster>,

    /// Stop reconciling this cluster
    #[serde(default)]
    pub paused: bool,
}

/// PD component specification
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PdSpec {
    /// Number of PD members
    pub replicas: i32,

    /// PD image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// PD sub-service specification
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PdmsSpec {
    /// Sub-service name, e.g. `tso` or `scheduling`
    pub name: String,

    /// Number of members
    pub replicas: i32,
}

/// Reference to another DbCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRef {
    /// Namespace of the referenced cluster (defaults to this cluster's)
    #[serde(default)]
    pub namespace: String,

    /// Name of the referenced cluster
    pub name: String,

    /// Cluster domain of the referenced cluster
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_domain: Option<String>,
}

/// Cluster TLS switch
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsCluster {
    /// Whether TLS is enabled between components
    #[serde(default)]
    pub enabled: bool,
}

/// DbCluster status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbClusterStatus {
    /// Coarse cluster phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// PD status
    #[serde(default)]
    pub pd: PdStatus,

    /// Status of each PD sub-service
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pdms: Vec<PdmsStatus>,

    /// Conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Observed PD membership
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PdStatus {
    /// All members reported healthy on the last probe
    #[serde(default)]
    pub healthy: bool,

    /// Members managed by this cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<PdMember>,

    /// Members running elsewhere (other clusters or Kubernetes clusters),
    /// in the order PD reported them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peer_members: Vec<PdMember>,
}

/// A PD member as reported by PD
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PdMember {
    /// Member name
    pub name: String,

    /// Client URL, e.g. `https://demo-pd-0.demo-pd-peer.db.svc.cluster2.local:2379`
    #[serde(rename = "clientURL")]
    pub client_url: String,

    /// Last observed health
    #[serde(default)]
    pub health: bool,
}

/// Observed membership of one PD sub-service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PdmsStatus {
    /// Sub-service name
    pub name: String,

    /// Member client URLs
    #[serde(default)]
    pub members: Vec<String>,

    /// Whether a reachable member was found on the last pass
    #[serde(default)]
    pub available: bool,
}

/// Status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,

    /// Status (True, False, Unknown)
    pub status: String,

    /// Last transition time
    pub last_transition_time: DateTime<Utc>,

    /// Reason for the condition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl DbCluster {
    /// The cluster runs no PD of its own
    pub fn without_local_pd(&self) -> bool {
        self.spec.pd.is_none()
    }

    /// TLS between components is enabled
    pub fn tls_cluster_enabled(&self) -> bool {
        self.spec.tls_cluster.as_ref().is_some_and(|t| t.enabled)
    }
}

impl DbClusterStatus {
    /// Set a condition, keeping the transition time when the status is unchanged
    pub fn set_condition(&mut self, type_: &str, status: bool, reason: &str, message: &str) {
        let status = if status { "True" } else { "False" }.to_string();
        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.last_transition_time = Utc::now();
            }
            existing.status = status;
            existing.reason = Some(reason.to_string());
            existing.message = Some(message.to_string());
            return;
        }
        self.conditions.push(Condition {
            type_: type_.to_string(),
            status,
            last_transition_time: Utc::now(),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_condition_keeps_transition_time_when_unchanged() {
        let mut status = DbClusterStatus::default();
        status.set_condition("PdReachable", true, "HealthOk", "ok");
        let first = status.conditions[0].last_transition_time;

        status.set_condition("PdReachable", true, "HealthOk", "still ok");

        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].last_transition_time, first);
        assert_eq!(status.conditions[0].message.as_deref(), Some("still ok"));
    }

    #[test]
    fn test_peer_member_wire_format() {
        let member: PdMember = serde_json::from_str(
            r#"{"name":"n1","clientURL":"http://n1:2379","health":true}"#,
        )
        .unwrap();
        assert_eq!(member.client_url, "http://n1:2379");
        assert!(member.health);
    }
}

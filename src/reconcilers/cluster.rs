//! DbCluster status reconciler
//!
//! Probes PD and its sub-services through the client resolver and records
//! what it saw in the cluster status:
//! - PD reachability as the `PdReachable` condition
//! - member health, split into members of this cluster and peer members
//! - availability and members of every configured sub-service
//!
//! Peer members and sub-service members recorded here are the failover
//! candidates of the next pass.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::crd::{DbCluster, DbClusterStatus, PdMember, PdmsStatus};
use crate::error::{Error, Result};
use crate::identity::ObjectKey;
use crate::pd::{HealthInfo, PdControl};
use crate::resolver::{resolve_pd_client, resolve_pdms_client, ClusterDescriptor};
use crate::update::{guaranteed_update, RecordStore, RetryPolicy};

/// Condition type recording whether PD answered the last health probe
pub const PD_REACHABLE: &str = "PdReachable";

/// Condition type recording whether every sub-service is available
pub const PDMS_AVAILABLE: &str = "PdmsAvailable";

pub const PHASE_RUNNING: &str = "Running";
pub const PHASE_DEGRADED: &str = "Degraded";
pub const PHASE_UNAVAILABLE: &str = "Unavailable";

pub struct ClusterReconciler {
    pd_control: Arc<dyn PdControl>,
    status_store: Arc<dyn RecordStore<DbCluster>>,
    policy: RetryPolicy,
}

impl ClusterReconciler {
    pub fn new(pd_control: Arc<dyn PdControl>, status_store: Arc<dyn RecordStore<DbCluster>>) -> Self {
        Self {
            pd_control,
            status_store,
            policy: RetryPolicy::default(),
        }
    }

    /// Drop the shared PD clients of a cluster that no longer exists
    pub fn release_clients(&self, key: &ObjectKey) {
        self.pd_control
            .invalidate_cluster(key.namespace.as_deref().unwrap_or_default(), &key.name);
    }

    /// Run one pass over `cluster`
    ///
    /// Returns a requeue error while PD or a sub-service is unreachable and
    /// an ignore error for paused clusters.
    #[instrument(skip(self, cluster), fields(name = %cluster.name_any(), namespace = cluster.namespace()))]
    pub async fn reconcile(&self, cluster: &DbCluster) -> Result<()> {
        if cluster.spec.paused {
            return Err(Error::ignore(format!(
                "cluster {} is paused",
                cluster.name_any()
            )));
        }

        let desc = ClusterDescriptor::from(cluster);
        let pd = resolve_pd_client(self.pd_control.as_ref(), &desc).await;

        let health = match pd.get_health().await {
            Ok(health) => health,
            Err(e) => {
                let message = format!("PD at {} is unreachable: {}", pd.url(), e);
                self.update_status(cluster, |status| {
                    status.phase = Some(PHASE_UNAVAILABLE.to_string());
                    status.pd.healthy = false;
                    status.set_condition(PD_REACHABLE, false, "HealthCheckFailed", &message);
                })
                .await?;
                return Err(Error::requeue(message));
            }
        };

        let (members, peer_members) = split_members(&cluster.name_any(), &health);
        let healthy = health.all_healthy();
        debug!(
            members = members.len(),
            peer_members = peer_members.len(),
            healthy = healthy,
            "PD health observed"
        );

        let mut pdms = Vec::with_capacity(cluster.spec.pdms.len());
        for service in &cluster.spec.pdms {
            // an unreadable registry keeps the last known members
            let members = match pd.get_service_members(&service.name).await {
                Ok(members) => Some(members),
                Err(e) => {
                    debug!(service = %service.name, error = %e, "Cannot list sub-service members");
                    None
                }
            };
            let available = resolve_pdms_client(self.pd_control.as_ref(), &desc, &service.name)
                .await
                .is_some();
            pdms.push(ServiceObservation {
                name: service.name.clone(),
                available,
                members,
            });
        }
        let unavailable: Vec<&str> = pdms
            .iter()
            .filter(|s| !s.available)
            .map(|s| s.name.as_str())
            .collect();

        let phase = if healthy && unavailable.is_empty() {
            PHASE_RUNNING
        } else {
            PHASE_DEGRADED
        };
        let pdms_message = if unavailable.is_empty() {
            "all sub-services available".to_string()
        } else {
            format!("unavailable: {}", unavailable.join(", "))
        };

        self.update_status(cluster, |status| {
            status.phase = Some(phase.to_string());
            status.pd.healthy = healthy;
            status.pd.members = members.clone();
            status.pd.peer_members = peer_members.clone();
            status.set_condition(PD_REACHABLE, true, "HealthCheckSucceeded", "PD answered health probe");
            for observed in &pdms {
                record_pdms(status, observed);
            }
            status.pdms.retain(|s| pdms.iter().any(|o| o.name == s.name));
            if !pdms.is_empty() {
                status.set_condition(
                    PDMS_AVAILABLE,
                    unavailable.is_empty(),
                    if unavailable.is_empty() { "Available" } else { "Unavailable" },
                    &pdms_message,
                );
            }
        })
        .await?;

        if !unavailable.is_empty() {
            return Err(Error::requeue(pdms_message));
        }
        info!(phase = phase, "Cluster status reconciled");
        Ok(())
    }

    async fn update_status<F>(&self, cluster: &DbCluster, mut mutate: F) -> Result<()>
    where
        F: FnMut(&mut DbClusterStatus),
    {
        let mut obj = DbCluster::new(&cluster.name_any(), cluster.spec.clone());
        obj.metadata.namespace = cluster.namespace();
        guaranteed_update(self.status_store.as_ref(), &mut obj, &self.policy, |dc| {
            mutate(dc.status.get_or_insert_with(Default::default));
            Ok(())
        })
        .await
    }
}

/// What one pass saw of a sub-service
struct ServiceObservation {
    name: String,
    available: bool,
    /// `None` when PD could not list the members
    members: Option<Vec<String>>,
}

fn record_pdms(status: &mut DbClusterStatus, observed: &ServiceObservation) {
    let entry = match status.pdms.iter().position(|s| s.name == observed.name) {
        Some(i) => &mut status.pdms[i],
        None => {
            status.pdms.push(PdmsStatus {
                name: observed.name.clone(),
                ..Default::default()
            });
            let last = status.pdms.len() - 1;
            &mut status.pdms[last]
        }
    };
    entry.available = observed.available;
    if let Some(members) = &observed.members {
        entry.members = members.clone();
    }
}

/// Split reported members into members of `cluster` and peer members,
/// preserving the order PD reported them in
pub fn split_members(cluster: &str, health: &HealthInfo) -> (Vec<PdMember>, Vec<PdMember>) {
    let prefix = format!("{}-pd-", cluster);
    health
        .healths
        .iter()
        .map(|m| PdMember {
            name: m.name.clone(),
            client_url: m.client_urls.first().cloned().unwrap_or_default(),
            health: m.health,
        })
        .partition(|m| m.name.starts_with(&prefix))
}

//! DbMonitor and DbDashboard Custom Resource Definitions

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DbMonitor resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "db.oso.sh",
    version = "v1alpha1",
    kind = "DbMonitor",
    plural = "dbmonitors",
    singular = "dbmonitor",
    shortname = "dbm",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DbMonitorSpec {
    /// Clusters scraped by this monitor (same namespace)
    pub clusters: Vec<String>,

    /// Metrics retention, e.g. `15d`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<String>,
}

/// DbDashboard resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "db.oso.sh",
    version = "v1alpha1",
    kind = "DbDashboard",
    plural = "dbdashboards",
    singular = "dbdashboard",
    shortname = "dbd",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct DbDashboardSpec {
    /// Cluster the dashboard connects to (same namespace)
    pub cluster: String,
}

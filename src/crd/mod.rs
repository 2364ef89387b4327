//! Custom Resource Definitions for the DB Cluster Operator

mod db_backup;
mod db_cluster;
mod db_monitor;
mod db_restore;

pub use db_backup::*;
pub use db_cluster::*;
pub use db_monitor::*;
pub use db_restore::*;

use kube::CustomResourceExt;

/// API group shared by all custom resources
pub const GROUP: &str = "db.oso.sh";

/// API version shared by all custom resources
pub const VERSION: &str = "v1alpha1";

/// Generate all CRD YAML manifests
pub fn generate_crds() -> Result<Vec<String>, serde_yaml::Error> {
    [
        DbCluster::crd(),
        DbBackup::crd(),
        DbRestore::crd(),
        DbBackupSchedule::crd(),
        DbMonitor::crd(),
        DbDashboard::crd(),
    ]
    .iter()
    .map(serde_yaml::to_string)
    .collect()
}

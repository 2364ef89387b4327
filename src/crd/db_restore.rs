//! DbRestore Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DbRestore resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "db.oso.sh",
    version = "v1alpha1",
    kind = "DbRestore",
    plural = "dbrestores",
    singular = "dbrestore",
    shortname = "dbr",
    namespaced,
    status = "DbRestoreStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DbRestoreSpec {
    /// Name of the DbCluster to restore into (same namespace)
    pub cluster: String,

    /// Source URI of the backup
    pub source: String,
}

/// DbRestore status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DbRestoreStatus {
    /// Current phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

//! DbBackup and DbBackupSchedule Custom Resource Definitions

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DbBackup resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "db.oso.sh",
    version = "v1alpha1",
    kind = "DbBackup",
    plural = "dbbackups",
    singular = "dbbackup",
    shortname = "dbk",
    namespaced,
    status = "DbBackupStatus",
    printcolumn = r#"{"name": "Phase", "type": "string", "jsonPath": ".status.phase"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DbBackupSpec {
    /// Name of the DbCluster to back up (same namespace)
    pub cluster: String,

    /// Destination URI, e.g. `s3://bucket/prefix`
    pub destination: String,
}

/// DbBackup status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DbBackupStatus {
    /// Current phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Completion time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

/// DbBackupSchedule resource specification
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "db.oso.sh",
    version = "v1alpha1",
    kind = "DbBackupSchedule",
    plural = "dbbackupschedules",
    singular = "dbbackupschedule",
    shortname = "dbks",
    namespaced,
    status = "DbBackupScheduleStatus",
    printcolumn = r#"{"name": "Schedule", "type": "string", "jsonPath": ".spec.schedule"}"#,
    printcolumn = r#"{"name": "Last Backup", "type": "string", "jsonPath": ".status.lastBackup"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DbBackupScheduleSpec {
    /// Cron schedule
    pub schedule: String,

    /// Template for the backups this schedule creates
    pub backup_template: DbBackupSpec,

    /// Suspend scheduling
    #[serde(default)]
    pub pause: bool,
}

/// DbBackupSchedule status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DbBackupScheduleStatus {
    /// Name of the most recent DbBackup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<String>,
}

//! Owner references tying dependent objects to their controlling resource

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::core::{GroupVersion, GroupVersionKind};
use kube::Resource;

use crate::crd::{DbBackup, DbBackupSchedule, DbCluster, DbDashboard, DbMonitor, DbRestore};
use crate::error::{Error, Result};

/// Group, version and kind of a statically typed resource
pub fn controller_kind<K: Resource<DynamicType = ()>>() -> GroupVersionKind {
    GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()))
}

/// Controlling owner reference for `obj`
///
/// Always sets `controller` and `blockOwnerDeletion`, so garbage collection
/// waits for dependents and owner-based event routing can find the owner.
pub fn owner_ref<K: Resource<DynamicType = ()>>(obj: &K) -> OwnerReference {
    let meta = obj.meta();
    OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: meta.name.clone().unwrap_or_default(),
        uid: meta.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Owner reference for objects managed on behalf of a DbCluster
pub fn cluster_owner_ref(cluster: &DbCluster) -> OwnerReference {
    owner_ref(cluster)
}

/// Owner reference for objects managed on behalf of a DbBackup
pub fn backup_owner_ref(backup: &DbBackup) -> OwnerReference {
    owner_ref(backup)
}

/// Owner reference for objects managed on behalf of a DbRestore
pub fn restore_owner_ref(restore: &DbRestore) -> OwnerReference {
    owner_ref(restore)
}

/// Owner reference for backups created by a DbBackupSchedule
pub fn backup_schedule_owner_ref(schedule: &DbBackupSchedule) -> OwnerReference {
    owner_ref(schedule)
}

pub fn monitor_owner_ref(monitor: &DbMonitor) -> OwnerReference {
    owner_ref(monitor)
}

pub fn dashboard_owner_ref(dashboard: &DbDashboard) -> OwnerReference {
    owner_ref(dashboard)
}

/// The first owner reference marked as controller
pub fn controller_of(meta: &ObjectMeta) -> Option<&OwnerReference> {
    meta.owner_references
        .as_deref()?
        .iter()
        .find(|r| r.controller == Some(true))
}

/// Install `owner` as the controlling owner of `meta`
///
/// An existing reference with the same UID is replaced. A different
/// controller already present is an error: an object has one controller.
pub fn set_controller_ref(meta: &mut ObjectMeta, owner: OwnerReference) -> Result<()> {
    if owner.controller != Some(true) {
        return Err(Error::OwnerReference(format!(
            "{}/{} is not marked as controller",
            owner.kind, owner.name
        )));
    }
    if let Some(existing) = controller_of(meta) {
        if existing.uid != owner.uid {
            return Err(Error::OwnerReference(format!(
                "object {} is already controlled by {} {}",
                meta.name.as_deref().unwrap_or_default(),
                existing.kind,
                existing.name
            )));
        }
    }
    let refs = meta.owner_references.get_or_insert_with(Vec::new);
    refs.retain(|r| r.uid != owner.uid);
    refs.push(owner);
    Ok(())
}

/// Parse an `apiVersion` string: `v1` is the core group, `group/version` otherwise
///
/// `""` and `"/"` parse to the empty group version; more than one `/` is an
/// error.
pub fn parse_group_version(api_version: &str) -> Result<GroupVersion> {
    if api_version.is_empty() || api_version == "/" {
        return Ok(GroupVersion::gv("", ""));
    }
    match api_version.split('/').collect::<Vec<_>>().as_slice() {
        [version] => Ok(GroupVersion::gv("", version)),
        [group, version] => Ok(GroupVersion::gv(group, version)),
        _ => Err(Error::OwnerReference(format!(
            "unexpected apiVersion {:?}",
            api_version
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::DbClusterSpec;

    fn cluster(name: &str, uid: &str) -> DbCluster {
        let mut dc = DbCluster::new(name, DbClusterSpec::default());
        dc.metadata.namespace = Some("db".to_string());
        dc.metadata.uid = Some(uid.to_string());
        dc
    }

    #[test]
    fn test_owner_ref_sets_both_flags() {
        let r = cluster_owner_ref(&cluster("demo", "uid-1"));

        assert_eq!(r.api_version, "db.oso.sh/v1alpha1");
        assert_eq!(r.kind, "DbCluster");
        assert_eq!(r.name, "demo");
        assert_eq!(r.uid, "uid-1");
        assert_eq!(r.controller, Some(true));
        assert_eq!(r.block_owner_deletion, Some(true));
    }

    #[test]
    fn test_owner_ref_per_kind() {
        let backup = DbBackup::new("b1", Default::default());
        let schedule = DbBackupSchedule::new("s1", Default::default());
        assert_eq!(backup_owner_ref(&backup).kind, "DbBackup");
        assert_eq!(backup_schedule_owner_ref(&schedule).kind, "DbBackupSchedule");
        assert_eq!(
            restore_owner_ref(&DbRestore::new("r1", Default::default())).kind,
            "DbRestore"
        );
        assert_eq!(
            monitor_owner_ref(&DbMonitor::new("m1", Default::default())).kind,
            "DbMonitor"
        );
    }

    #[test]
    fn test_controller_kind() {
        let gvk = controller_kind::<DbCluster>();
        assert_eq!(gvk.group, "db.oso.sh");
        assert_eq!(gvk.version, "v1alpha1");
        assert_eq!(gvk.kind, "DbCluster");
    }

    #[test]
    fn test_controller_of_skips_non_controller_refs() {
        let mut plain = cluster_owner_ref(&cluster("other", "uid-0"));
        plain.controller = Some(false);
        let meta = ObjectMeta {
            owner_references: Some(vec![plain, cluster_owner_ref(&cluster("demo", "uid-1"))]),
            ..Default::default()
        };

        assert_eq!(controller_of(&meta).map(|r| r.name.as_str()), Some("demo"));
        assert!(controller_of(&ObjectMeta::default()).is_none());
    }

    #[test]
    fn test_set_controller_ref_refuses_second_controller() {
        let mut meta = ObjectMeta::default();
        set_controller_ref(&mut meta, cluster_owner_ref(&cluster("demo", "uid-1"))).unwrap();
        set_controller_ref(&mut meta, cluster_owner_ref(&cluster("demo", "uid-1"))).unwrap();
        assert_eq!(meta.owner_references.as_ref().unwrap().len(), 1);

        let err = set_controller_ref(&mut meta, cluster_owner_ref(&cluster("b", "uid-2")));
        assert!(matches!(err, Err(Error::OwnerReference(_))));
    }

    #[test]
    fn test_parse_group_version() {
        let gv = parse_group_version("db.oso.sh/v1alpha1").unwrap();
        assert_eq!((gv.group.as_str(), gv.version.as_str()), ("db.oso.sh", "v1alpha1"));

        let core = parse_group_version("v1").unwrap();
        assert_eq!((core.group.as_str(), core.version.as_str()), ("", "v1"));

        for empty in ["", "/"] {
            let gv = parse_group_version(empty).unwrap();
            assert_eq!((gv.group.as_str(), gv.version.as_str()), ("", ""));
        }

        assert!(parse_group_version("a/b/c").is_err());
    }
}

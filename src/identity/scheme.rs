//! Type scheme: an explicit catalog from Rust types to Kubernetes kinds
//!
//! Generic utilities receive objects as `&dyn ObjectHandle` and need the
//! concrete kind back. Instead of guessing from the object, every type is
//! registered with the kind(s) it serves and the lookup must be unambiguous.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::GroupVersionKind;
use kube::Resource;

use super::owner::controller_kind;
use crate::crd::{DbBackup, DbBackupSchedule, DbCluster, DbDashboard, DbMonitor, DbRestore};
use crate::error::{Error, Result};

/// Identity of a Rust type in the scheme
#[derive(Clone, Copy)]
pub struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub fn of<T: Any>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A type-erased Kubernetes object
pub trait ObjectHandle: Any + Send + Sync {
    fn type_tag(&self) -> TypeTag;
    fn object_meta(&self) -> &ObjectMeta;
    fn object_meta_mut(&mut self) -> &mut ObjectMeta;
    fn as_any(&self) -> &dyn Any;
    fn clone_handle(&self) -> Box<dyn ObjectHandle>;
}

impl<K> ObjectHandle for K
where
    K: Resource + Clone + Any + Send + Sync,
{
    fn type_tag(&self) -> TypeTag {
        TypeTag::of::<K>()
    }

    fn object_meta(&self) -> &ObjectMeta {
        self.meta()
    }

    fn object_meta_mut(&mut self) -> &mut ObjectMeta {
        self.meta_mut()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_handle(&self) -> Box<dyn ObjectHandle> {
        Box::new(self.clone())
    }
}

impl fmt::Debug for dyn ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.object_meta();
        f.debug_struct("ObjectHandle")
            .field("type", &self.type_tag())
            .field("namespace", &meta.namespace)
            .field("name", &meta.name)
            .finish()
    }
}

/// Borrow the concrete object behind a handle
pub fn downcast_ref<K: Any>(obj: &dyn ObjectHandle) -> Option<&K> {
    obj.as_any().downcast_ref::<K>()
}

type Constructor = Arc<dyn Fn() -> Box<dyn ObjectHandle> + Send + Sync>;

struct SchemeEntry {
    tag: TypeTag,
    gvk: GroupVersionKind,
    new: Constructor,
}

/// Registry of the kinds this operator knows how to construct and inspect
#[derive(Default)]
pub struct Scheme {
    entries: Vec<SchemeEntry>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `K` under its own group, version and kind
    pub fn register<K, F>(&mut self, new: F) -> &mut Self
    where
        K: Resource<DynamicType = ()> + Clone + Any + Send + Sync,
        F: Fn() -> K + Send + Sync + 'static,
    {
        self.register_as(controller_kind::<K>(), new)
    }

    /// Register `K` under an explicit kind
    ///
    /// Registering the same type under several kinds is allowed; inferring
    /// the kind of such a type then fails as ambiguous.
    pub fn register_as<K, F>(&mut self, gvk: GroupVersionKind, new: F) -> &mut Self
    where
        K: Resource + Clone + Any + Send + Sync,
        F: Fn() -> K + Send + Sync + 'static,
    {
        let tag = TypeTag::of::<K>();
        if self.entries.iter().any(|e| e.tag == tag && e.gvk == gvk) {
            return self;
        }
        self.entries.push(SchemeEntry {
            tag,
            gvk,
            new: Arc::new(move || Box::new(new()) as Box<dyn ObjectHandle>),
        });
        self
    }

    /// All kinds registered for the type of `obj`
    pub fn object_kinds(&self, obj: &dyn ObjectHandle) -> Vec<&GroupVersionKind> {
        let tag = obj.type_tag();
        self.entries
            .iter()
            .filter(|e| e.tag == tag)
            .map(|e| &e.gvk)
            .collect()
    }

    /// The single kind registered for the type of `obj`
    pub fn infer_kind(&self, obj: &dyn ObjectHandle) -> Result<GroupVersionKind> {
        match self.object_kinds(obj).as_slice() {
            [] => Err(Error::UnregisteredKind(obj.type_tag().name().to_string())),
            [gvk] => Ok((*gvk).clone()),
            many => Err(Error::AmbiguousKind {
                type_name: obj.type_tag().name().to_string(),
                kinds: many
                    .iter()
                    .map(|g| format!("{}, Kind={}", g.api_version(), g.kind))
                    .collect::<Vec<_>>()
                    .join("; "),
            }),
        }
    }

    /// Whether any type is registered under `gvk`
    pub fn recognizes(&self, gvk: &GroupVersionKind) -> bool {
        self.entries.iter().any(|e| &e.gvk == gvk)
    }

    /// A fresh default instance of `gvk`
    pub fn new_object(&self, gvk: &GroupVersionKind) -> Result<Box<dyn ObjectHandle>> {
        self.entries
            .iter()
            .find(|e| &e.gvk == gvk)
            .map(|e| (e.new)())
            .ok_or_else(|| {
                Error::UnregisteredKind(format!("{}, Kind={}", gvk.api_version(), gvk.kind))
            })
    }

    /// A new object of the same kind carrying only the name and namespace of `obj`
    pub fn empty_clone(&self, obj: &dyn ObjectHandle) -> Result<Box<dyn ObjectHandle>> {
        let gvk = self.infer_kind(obj)?;
        let mut inst = self.new_object(&gvk)?;
        let src = obj.object_meta();
        let meta = inst.object_meta_mut();
        meta.name = src.name.clone();
        meta.namespace = src.namespace.clone();
        Ok(inst)
    }
}

/// Scheme with every custom resource and the core kinds the operator touches
pub fn default_scheme() -> Scheme {
    let mut scheme = Scheme::new();
    scheme
        .register(|| DbCluster::new("", Default::default()))
        .register(|| DbBackup::new("", Default::default()))
        .register(|| DbRestore::new("", Default::default()))
        .register(|| DbBackupSchedule::new("", Default::default()))
        .register(|| DbMonitor::new("", Default::default()))
        .register(|| DbDashboard::new("", Default::default()))
        .register(Pod::default)
        .register(Service::default)
        .register(ConfigMap::default)
        .register(Secret::default)
        .register(PersistentVolumeClaim::default)
        .register(StatefulSet::default);
    scheme
}

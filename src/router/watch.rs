//! Event routing from watched objects to reconcile keys
//!
//! Handlers run on the informer's delivery path: they never block and do
//! nothing beyond enqueueing. Owner lookups go through an in-memory lister.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use tracing::{debug, error};

use crate::error::Result;
use crate::identity::{controller_of, parse_group_version, ObjectHandle, ObjectKey, Scheme};

use super::informer::{Informer, ResourceEventHandler};
use super::queue::WorkQueue;

/// Looks up a candidate controller by namespace and name
///
/// A missing object must be reported as an error for which
/// [`crate::Error::is_not_found`] is true.
pub type GetControllerFn =
    Arc<dyn Fn(&str, &str) -> Result<Arc<dyn ObjectHandle>> + Send + Sync>;

/// Enqueues the key of the notified object itself
pub struct EnqueueObject {
    queue: WorkQueue<ObjectKey>,
}

impl EnqueueObject {
    pub fn new(queue: WorkQueue<ObjectKey>) -> Self {
        Self { queue }
    }

    fn enqueue(&self, meta: &ObjectMeta) {
        match ObjectKey::from_meta(meta) {
            Ok(key) => self.queue.add(key),
            Err(e) => error!(error = %e, "Cannot key notified object"),
        }
    }
}

impl<K: Resource> ResourceEventHandler<K> for EnqueueObject {
    fn on_add(&self, obj: &K) {
        self.enqueue(obj.meta());
    }

    fn on_update(&self, _old: &K, new: &K) {
        self.enqueue(new.meta());
    }

    fn on_delete(&self, obj: &K) {
        self.enqueue(obj.meta());
    }
}

/// Enqueues the key of the notified object's controller
///
/// The controller reference is trusted only when the object it resolves to
/// has the same kind and API group as the reference claims.
pub struct EnqueueController {
    queue: WorkQueue<ObjectKey>,
    scheme: Arc<Scheme>,
    get_controller: GetControllerFn,
    label_filter: Option<BTreeMap<String, String>>,
}

impl EnqueueController {
    pub fn new(
        queue: WorkQueue<ObjectKey>,
        scheme: Arc<Scheme>,
        get_controller: GetControllerFn,
        label_filter: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            queue,
            scheme,
            get_controller,
            label_filter,
        }
    }

    fn matches_labels(&self, meta: &ObjectMeta) -> bool {
        let Some(filter) = self.label_filter.as_ref().filter(|f| !f.is_empty()) else {
            return true;
        };
        let Some(labels) = meta.labels.as_ref() else {
            return false;
        };
        filter.iter().all(|(k, v)| labels.get(k) == Some(v))
    }

    fn enqueue(&self, meta: &ObjectMeta) {
        if !self.matches_labels(meta) {
            return;
        }
        let Some(owner) = controller_of(meta) else {
            return;
        };
        let gv = match parse_group_version(&owner.api_version) {
            Ok(gv) => gv,
            Err(e) => {
                error!(owner = %owner.name, error = %e, "Cannot parse controller apiVersion");
                return;
            }
        };
        let namespace = meta.namespace.as_deref().unwrap_or_default();

        let controller = match (self.get_controller)(namespace, &owner.name) {
            Ok(controller) => controller,
            Err(e) if e.is_not_found() => {
                debug!(namespace = %namespace, owner = %owner.name, "Controller not found, skipping");
                return;
            }
            Err(e) => {
                error!(namespace = %namespace, owner = %owner.name, error = %e, "Controller lookup failed");
                return;
            }
        };

        let gvk = match self.scheme.infer_kind(controller.as_ref()) {
            Ok(gvk) => gvk,
            Err(e) => {
                error!(owner = %owner.name, error = %e, "Cannot infer controller kind");
                return;
            }
        };
        if gvk.kind != owner.kind || gvk.group != gv.group {
            debug!(
                owner = %owner.name,
                expected = %owner.kind,
                actual = %gvk.kind,
                "Controller reference does not match resolved object"
            );
            return;
        }

        match ObjectKey::from_meta(controller.object_meta()) {
            Ok(key) => self.queue.add(key),
            Err(e) => error!(error = %e, "Cannot key controller"),
        }
    }
}

impl<K: Resource> ResourceEventHandler<K> for EnqueueController {
    fn on_add(&self, obj: &K) {
        self.enqueue(obj.meta());
    }

    fn on_update(&self, _old: &K, new: &K) {
        self.enqueue(new.meta());
    }

    fn on_delete(&self, obj: &K) {
        self.enqueue(obj.meta());
    }
}

/// Route every notification of `informer` to the object's own key
pub fn watch_for_object<K>(informer: &mut Informer<K>, queue: WorkQueue<ObjectKey>)
where
    K: Resource<DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    informer.add_handler(Arc::new(EnqueueObject::new(queue)));
}

/// Route every notification of `informer` to the key of the object's
/// controller, for objects carrying all of `label_filter`
pub fn watch_for_controller<K>(
    informer: &mut Informer<K>,
    queue: WorkQueue<ObjectKey>,
    scheme: Arc<Scheme>,
    get_controller: GetControllerFn,
    label_filter: Option<BTreeMap<String, String>>,
) where
    K: Resource<DynamicType = ()>
        + Clone
        + std::fmt::Debug
        + serde::de::DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    informer.add_handler(Arc::new(EnqueueController::new(
        queue,
        scheme,
        get_controller,
        label_filter,
    )));
}

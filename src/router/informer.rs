//! Watch stream adapter with a local object cache
//!
//! Turns kube `watcher` events into add/update/delete callbacks. A relist
//! replaces the cache wholesale; objects that vanished while the watch was
//! down are reported as deletes.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use crate::identity::ObjectKey;

/// Receiver of object change notifications
pub trait ResourceEventHandler<K>: Send + Sync {
    fn on_add(&self, obj: &K);
    fn on_update(&self, old: &K, new: &K);
    fn on_delete(&self, obj: &K);
}

type Cache<K> = Arc<RwLock<HashMap<ObjectKey, Arc<K>>>>;

/// Read-only view of an informer's cache
pub struct Lister<K> {
    cache: Cache<K>,
}

impl<K> Clone for Lister<K> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
        }
    }
}

impl<K> Lister<K> {
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.cache.read().get(&ObjectKey::new(namespace, name)).cloned()
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Informer<K> {
    cache: Cache<K>,
    handlers: Vec<Arc<dyn ResourceEventHandler<K>>>,
    relist: Option<HashSet<ObjectKey>>,
}

impl<K> Default for Informer<K> {
    fn default() -> Self {
        Self {
            cache: Arc::default(),
            handlers: Vec::new(),
            relist: None,
        }
    }
}

impl<K> Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, handler: Arc<dyn ResourceEventHandler<K>>) {
        self.handlers.push(handler);
    }

    pub fn lister(&self) -> Lister<K> {
        Lister {
            cache: self.cache.clone(),
        }
    }

    /// Apply one watch event to the cache and notify handlers
    pub fn handle(&mut self, event: Event<K>) {
        match event {
            Event::Init => self.relist = Some(HashSet::new()),
            Event::InitApply(obj) => {
                if let Some(key) = self.upsert(obj) {
                    if let Some(seen) = self.relist.as_mut() {
                        seen.insert(key);
                    }
                }
            }
            Event::InitDone => {
                let Some(seen) = self.relist.take() else {
                    return;
                };
                let vanished: Vec<Arc<K>> = {
                    let mut cache = self.cache.write();
                    let gone: Vec<ObjectKey> = cache
                        .keys()
                        .filter(|key| !seen.contains(key))
                        .cloned()
                        .collect();
                    gone.iter().filter_map(|key| cache.remove(key)).collect()
                };
                for obj in vanished {
                    for handler in &self.handlers {
                        handler.on_delete(&obj);
                    }
                }
            }
            Event::Apply(obj) => {
                self.upsert(obj);
            }
            Event::Delete(obj) => {
                let Some(key) = key_of(&obj) else {
                    return;
                };
                self.cache.write().remove(&key);
                for handler in &self.handlers {
                    handler.on_delete(&obj);
                }
            }
        }
    }

    fn upsert(&mut self, obj: K) -> Option<ObjectKey> {
        let key = key_of(&obj)?;
        let obj = Arc::new(obj);
        let old = self.cache.write().insert(key.clone(), obj.clone());
        for handler in &self.handlers {
            match &old {
                Some(old) => handler.on_update(old, &obj),
                None => handler.on_add(&obj),
            }
        }
        Some(key)
    }

    /// Watch `api` until the stream ends, delivering every event
    pub async fn run(mut self, api: Api<K>, config: watcher::Config) {
        let kind = K::kind(&()).to_string();
        let mut stream = watcher::watcher(api, config).default_backoff().boxed();
        debug!(kind = %kind, "Informer started");

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => self.handle(event),
                Err(e) => warn!(kind = %kind, error = %e, "Watch error, retrying"),
            }
        }
        warn!(kind = %kind, "Watch stream ended");
    }
}

fn key_of<K: Resource>(obj: &K) -> Option<ObjectKey> {
    match ObjectKey::from_meta(obj.meta()) {
        Ok(key) => Some(key),
        Err(e) => {
            error!(error = %e, "Cannot key watched object");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl ResourceEventHandler<ConfigMap> for Recorder {
        fn on_add(&self, obj: &ConfigMap) {
            self.events.lock().push(format!("add {}", obj.metadata.name.as_deref().unwrap_or_default()));
        }

        fn on_update(&self, _old: &ConfigMap, new: &ConfigMap) {
            self.events.lock().push(format!("update {}", new.metadata.name.as_deref().unwrap_or_default()));
        }

        fn on_delete(&self, obj: &ConfigMap) {
            self.events.lock().push(format!("delete {}", obj.metadata.name.as_deref().unwrap_or_default()));
        }
    }

    fn cm(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("db".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_apply_and_delete_reach_handlers_and_cache() {
        let recorder = Arc::new(Recorder::default());
        let mut informer: Informer<ConfigMap> = Informer::new();
        informer.add_handler(recorder.clone());
        let lister = informer.lister();

        informer.handle(Event::Apply(cm("a")));
        informer.handle(Event::Apply(cm("a")));
        assert!(lister.get("db", "a").is_some());

        informer.handle(Event::Delete(cm("a")));
        assert!(lister.is_empty());
        assert_eq!(*recorder.events.lock(), ["add a", "update a", "delete a"]);
    }

    #[test]
    fn test_relist_reports_vanished_objects() {
        let recorder = Arc::new(Recorder::default());
        let mut informer: Informer<ConfigMap> = Informer::new();
        informer.add_handler(recorder.clone());
        informer.handle(Event::Apply(cm("a")));
        informer.handle(Event::Apply(cm("b")));

        informer.handle(Event::Init);
        informer.handle(Event::InitApply(cm("b")));
        informer.handle(Event::InitDone);

        let lister = informer.lister();
        assert_eq!(lister.len(), 1);
        assert!(lister.get("db", "b").is_some());
        assert_eq!(
            *recorder.events.lock(),
            ["add a", "add b", "update b", "delete a"]
        );
    }

    #[test]
    fn test_unnamed_object_is_skipped() {
        let mut informer: Informer<ConfigMap> = Informer::new();
        let mut obj = cm("a");
        obj.metadata.name = None;
        informer.handle(Event::Apply(obj));
        assert!(informer.lister().is_empty());
    }
}

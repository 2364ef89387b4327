//! Guaranteed updates of shared records under optimistic concurrency
//!
//! Every attempt re-reads the record, re-applies the caller's mutation and
//! writes only when the mutation changed something. A write rejected for a
//! stale resource version starts another attempt; the retry budget is
//! finite and running out of it is an error.

use std::fmt::Debug;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::PostParams;
use kube::{Api, Client, Resource};
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::identity::ObjectKey;
use crate::metrics;

/// Persistent record store with optimistic concurrency
#[async_trait]
pub trait RecordStore<K>: Send + Sync {
    /// Current persisted value; not-found is reported as an error
    async fn get(&self, key: &ObjectKey) -> Result<K>;

    /// Persist `obj`; a stale resource version yields an error for which
    /// [`Error::is_conflict`] is true
    async fn update(&self, obj: &K) -> Result<K>;
}

/// Backoff between conflicting attempts
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first conflict
    pub initial_delay: Duration,
    /// Upper bound for a single delay
    pub max_delay: Duration,
    /// Multiplier applied after each conflict
    pub backoff_multiplier: f64,
    /// Extra random delay, as a fraction of the current delay
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(0.0..self.jitter);
        Duration::from_secs_f64(delay.as_secs_f64() * factor)
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Apply `mutate` to the latest persisted version of `obj` and persist it
///
/// `obj` only needs to carry the name and namespace on entry; it is
/// overwritten by each fetch and holds the persisted result on success.
/// `mutate` may run once per attempt and must give the same result when
/// re-run against fresh state. Its errors abort the update without a write.
pub async fn guaranteed_update<K, S, F>(
    store: &S,
    obj: &mut K,
    policy: &RetryPolicy,
    mut mutate: F,
) -> Result<()>
where
    K: Resource + Serialize + Send + Sync,
    S: RecordStore<K> + ?Sized,
    F: FnMut(&mut K) -> Result<()>,
{
    let key = ObjectKey::from_meta(obj.meta())?;
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        let conflict = match store.get(&key).await {
            Ok(current) => {
                *obj = current;
                let before = serde_json::to_value(&*obj)?;
                mutate(obj)?;
                if serde_json::to_value(&*obj)? == before {
                    debug!(key = %key, "Mutation left object unchanged, skipping update");
                    return Ok(());
                }
                match store.update(obj).await {
                    Ok(updated) => {
                        *obj = updated;
                        return Ok(());
                    }
                    Err(e) if e.is_conflict() => e,
                    Err(e) => return Err(e),
                }
            }
            Err(e) if e.is_conflict() => e,
            Err(e) => return Err(e),
        };

        metrics::UPDATE_CONFLICTS.inc();
        if attempt >= policy.max_attempts {
            error!(key = %key, attempts = attempt, error = %conflict, "Update conflicts exhausted retry budget");
            metrics::UPDATE_EXHAUSTED.inc();
            return Err(Error::UpdateExhausted {
                key: key.to_string(),
                attempts: attempt,
            });
        }

        let wait = policy.jittered(delay);
        debug!(key = %key, attempt = attempt, delay_ms = wait.as_millis(), "Update conflict, retrying");
        tokio::time::sleep(wait).await;
        delay = policy.next_delay(delay);
    }
}

/// [`RecordStore`] over the status subresource of a Kubernetes object
///
/// Writes use `replace_status`, which carries the resource version and is
/// rejected with 409 when stale.
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    pub fn status(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

impl<K> KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>,
{
    fn api(&self, namespace: Option<&str>) -> Result<Api<K>> {
        let ns = namespace.ok_or_else(|| Error::config("namespaced record without namespace"))?;
        Ok(Api::namespaced(self.client.clone(), ns))
    }
}

#[async_trait]
impl<K> RecordStore<K> for KubeStore<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<K> {
        let api = self.api(key.namespace.as_deref())?;
        Ok(api.get(&key.name).await?)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let key = ObjectKey::from_meta(obj.meta())?;
        let api = self.api(key.namespace.as_deref())?;
        let pp = PostParams::default();
        Ok(api
            .replace_status(&key.name, &pp, serde_json::to_vec(obj)?)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// In-memory store; each injected conflict simulates another writer
    /// landing first
    struct MemoryStore {
        current: Mutex<ConfigMap>,
        conflicts: AtomicU32,
        updates: AtomicU32,
        forbid_updates: bool,
    }

    impl MemoryStore {
        fn new(conflicts: u32) -> Self {
            let mut cm = config_map();
            cm.metadata.resource_version = Some("1".into());
            cm.data = Some([("count".to_string(), "0".to_string())].into());
            Self {
                current: Mutex::new(cm),
                conflicts: AtomicU32::new(conflicts),
                updates: AtomicU32::new(0),
                forbid_updates: false,
            }
        }

        fn forbidding_updates() -> Self {
            Self {
                forbid_updates: true,
                ..Self::new(0)
            }
        }

        fn snapshot(&self) -> ConfigMap {
            self.current.lock().clone()
        }
    }

    fn bump(cm: &mut ConfigMap) {
        let rv: u64 = cm
            .metadata
            .resource_version
            .as_deref()
            .unwrap_or("0")
            .parse()
            .unwrap();
        cm.metadata.resource_version = Some((rv + 1).to_string());
    }

    #[async_trait]
    impl RecordStore<ConfigMap> for MemoryStore {
        async fn get(&self, key: &ObjectKey) -> Result<ConfigMap> {
            let cm = self.current.lock().clone();
            if cm.metadata.name.as_deref() != Some(key.name.as_str()) {
                return Err(Error::not_found("ConfigMap", key.to_string()));
            }
            Ok(cm)
        }

        async fn update(&self, obj: &ConfigMap) -> Result<ConfigMap> {
            assert!(!self.forbid_updates, "update must not be called");
            let mut current = self.current.lock();
            if self.conflicts.load(Ordering::SeqCst) > 0 {
                self.conflicts.fetch_sub(1, Ordering::SeqCst);
                let writes = current
                    .data
                    .get_or_insert_with(Default::default)
                    .entry("other-writer".to_string())
                    .or_insert_with(|| "0".to_string());
                *writes = (writes.parse::<u32>().unwrap() + 1).to_string();
                bump(&mut current);
                return Err(Error::Conflict("db/settings".into()));
            }
            if obj.metadata.resource_version != current.metadata.resource_version {
                return Err(Error::Conflict("db/settings".into()));
            }
            self.updates.fetch_add(1, Ordering::SeqCst);
            let mut stored = obj.clone();
            bump(&mut stored);
            *current = stored.clone();
            Ok(stored)
        }
    }

    fn config_map() -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("settings".into()),
                namespace: Some("db".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn increment(cm: &mut ConfigMap) -> Result<()> {
        let data = cm.data.get_or_insert_with(Default::default);
        let count: u32 = data.get("count").map(|c| c.parse().unwrap()).unwrap_or(0);
        data.insert("count".into(), (count + 1).to_string());
        Ok(())
    }

    #[tokio::test]
    async fn test_noop_mutation_never_writes() {
        let store = MemoryStore::forbidding_updates();
        let mut obj = config_map();
        let mut calls = 0;

        guaranteed_update(&store, &mut obj, &policy(), |_| {
            calls += 1;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(obj.metadata.resource_version.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_setting_existing_value_is_a_noop() {
        let store = MemoryStore::forbidding_updates();
        let mut obj = config_map();

        guaranteed_update(&store, &mut obj, &policy(), |cm| {
            cm.data
                .get_or_insert_with(Default::default)
                .insert("count".into(), "0".into());
            Ok(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_conflicts_below_budget_apply_mutation_once() {
        let store = MemoryStore::new(3);
        let mut obj = config_map();
        let mut calls = 0;

        guaranteed_update(&store, &mut obj, &policy(), |cm| {
            calls += 1;
            increment(cm)
        })
        .await
        .unwrap();

        assert_eq!(calls, 4);
        assert_eq!(store.updates.load(Ordering::SeqCst), 1);
        let stored = store.snapshot();
        let data = stored.data.unwrap();
        assert_eq!(data["count"], "1");
        assert_eq!(data["other-writer"], "3");
        assert_eq!(obj.metadata.resource_version, stored.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_conflicts_past_budget_fail_without_partial_write() {
        let store = MemoryStore::new(10);
        let mut obj = config_map();

        let err = guaranteed_update(&store, &mut obj, &policy(), increment)
            .await
            .unwrap_err();

        match err {
            Error::UpdateExhausted { key, attempts } => {
                assert_eq!(key, "db/settings");
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(store.updates.load(Ordering::SeqCst), 0);
        let data = store.snapshot().data.unwrap();
        assert_eq!(data["count"], "0");
        assert_eq!(data["other-writer"], "5");
    }

    #[tokio::test]
    async fn test_mutation_error_aborts_without_write() {
        let store = MemoryStore::forbidding_updates();
        let mut obj = config_map();
        let mut calls = 0;

        let err = guaranteed_update(&store, &mut obj, &policy(), |_| {
            calls += 1;
            Err(Error::requeue("not ready"))
        })
        .await
        .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, Error::Requeue(_)));
    }

    #[tokio::test]
    async fn test_fetch_error_is_not_retried() {
        let store = MemoryStore::forbidding_updates();
        let mut obj = config_map();
        obj.metadata.name = Some("missing".into());
        let mut calls = 0;

        let err = guaranteed_update(&store, &mut obj, &policy(), |_| {
            calls += 1;
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(30),
            ..Default::default()
        };
        let mut delay = policy.initial_delay;
        for _ in 0..10 {
            delay = policy.next_delay(delay);
        }
        assert_eq!(delay, Duration::from_millis(30));
        assert!(policy.jittered(delay) <= Duration::from_millis(33));
    }
}

//! Deduplicating work queue
//!
//! A key is held at most once: adding a key that is already waiting is a
//! no-op, and adding a key that a worker is processing marks it dirty so it
//! is queued again only after the worker calls [`WorkQueue::done`]. Distinct
//! keys are handed to workers in parallel; one key is never processed by two
//! workers at once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::metrics;

const BASE_DELAY: Duration = Duration::from_millis(5);
const MAX_DELAY: Duration = Duration::from_secs(300);

struct State<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    failures: HashMap<T, u32>,
    /// Earliest pending delayed add per key
    waiting: HashMap<T, Instant>,
    shutting_down: bool,
}

struct Inner<T> {
    name: String,
    state: Mutex<State<T>>,
    notify: Notify,
}

/// Cloneable handle to a shared work queue
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + 'static,
{
    pub fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    failures: HashMap::new(),
                    waiting: HashMap::new(),
                    shutting_down: false,
                }),
                notify: Notify::new(),
            }),
        }
    }

    pub fn add(&self, item: T) {
        let mut state = self.inner.state.lock();
        if state.shutting_down || !state.dirty.insert(item.clone()) {
            return;
        }
        if state.processing.contains(&item) {
            return;
        }
        state.queue.push_back(item);
        self.record_depth(&state);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Next key to process, waiting until one is available
    ///
    /// Returns `None` once the queue is shut down and drained.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.inner.notify.notified();
            {
                let mut state = self.inner.state.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    self.record_depth(&state);
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Release a key returned by [`WorkQueue::get`]
    pub fn done(&self, item: &T) {
        let mut state = self.inner.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) {
            state.queue.push_back(item.clone());
            self.record_depth(&state);
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Add `item` once `delay` has passed
    ///
    /// A key has at most one live timer: a delay ending no earlier than the
    /// pending one is dropped, an earlier one supersedes it.
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let deadline = Instant::now() + delay;
        {
            let mut state = self.inner.state.lock();
            if state.shutting_down {
                return;
            }
            if state.waiting.get(&item).is_some_and(|pending| *pending <= deadline) {
                return;
            }
            state.waiting.insert(item.clone(), deadline);
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            queue.fire(item, deadline);
        });
    }

    fn fire(&self, item: T, deadline: Instant) {
        {
            let mut state = self.inner.state.lock();
            if state.waiting.get(&item) != Some(&deadline) {
                // superseded by an earlier timer
                return;
            }
            state.waiting.remove(&item);
        }
        self.add(item);
    }

    /// Add `item` after its per-key backoff, doubling the backoff each time
    pub fn add_rate_limited(&self, item: T) {
        let delay = {
            let mut state = self.inner.state.lock();
            let failures = state.failures.entry(item.clone()).or_insert(0);
            let exp = (*failures).min(31);
            *failures += 1;
            BASE_DELAY.saturating_mul(1u32 << exp).min(MAX_DELAY)
        };
        debug!(queue = %self.inner.name, delay_ms = delay.as_millis(), "Rate limited requeue");
        self.add_after(item, delay);
    }

    /// Reset the backoff of `item`
    pub fn forget(&self, item: &T) {
        self.inner.state.lock().failures.remove(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.inner
            .state
            .lock()
            .failures
            .get(item)
            .copied()
            .unwrap_or(0)
    }

    /// Number of keys waiting, excluding keys being processed
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting keys; waiting and future [`WorkQueue::get`] calls
    /// return `None` once the remaining keys are drained
    pub fn shut_down(&self) {
        self.inner.state.lock().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    fn record_depth(&self, state: &State<T>) {
        metrics::QUEUE_DEPTH
            .with_label_values(&[&self.inner.name])
            .set(state.queue.len() as i64);
    }
}

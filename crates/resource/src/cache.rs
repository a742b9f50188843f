use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex, PoisonError},
};

use lru::LruCache;
use serde::Deserialize;

use crate::{Outcome, Pollable, ResourceError};

/// Lifetime of the per-loader caches.
///
/// With no `max_entries` a cache keeps everything for the whole session. With a
/// capacity the least recently used entry is dropped first; handles already given
/// out stay valid since they own their data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct CachePolicy {
    #[serde(default)]
    pub max_entries: Option<NonZeroUsize>,
}

impl CachePolicy {
    pub fn unbounded() -> Self {
        Self { max_entries: None }
    }

    pub fn bounded(max_entries: NonZeroUsize) -> Self {
        Self {
            max_entries: Some(max_entries),
        }
    }
}

/// String keyed cache owned by a single loader.
///
/// The capacity is enforced after each insertion instead of by the LRU itself, so
/// an entry that must not go yet (a flight still in the air) can be skipped. The
/// cache may then stay over capacity until those entries settle.
pub struct CacheMap<V> {
    entries: Mutex<LruCache<String, V>>,
    capacity: Option<NonZeroUsize>,
}

impl<V: Clone> CacheMap<V> {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            entries: Mutex::new(LruCache::unbounded()),
            capacity: policy.max_entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// Returns the cached value for `key`, creating it with `create` if absent.
    ///
    /// The lookup and the insertion happen under one lock, so concurrent callers for
    /// the same key agree on a single value. The flag is `true` for the caller that
    /// created it.
    pub fn get_or_insert_with(&self, key: &str, create: impl FnOnce() -> V) -> (V, bool) {
        self.insert_evicting(key, create, |_| true)
    }

    /// [`CacheMap::get_or_insert_with`] where only entries accepted by `evictable`
    /// may be dropped to make room.
    fn insert_evicting(
        &self,
        key: &str,
        create: impl FnOnce() -> V,
        evictable: impl Fn(&V) -> bool,
    ) -> (V, bool) {
        let mut entries = self.lock();
        if let Some(value) = entries.get(key) {
            return (value.clone(), false);
        }
        let value = create();
        entries.put(key.to_string(), value.clone());

        if let Some(capacity) = self.capacity {
            while entries.len() > capacity.get() {
                // `iter` runs from most to least recently used.
                let victim = entries
                    .iter()
                    .rev()
                    .find(|(_, cached)| evictable(cached))
                    .map(|(victim, _)| victim.clone());
                match victim {
                    Some(victim) => {
                        entries.pop(&victim);
                    }
                    None => break,
                }
            }
        }
        (value, true)
    }

    /// Removes the entry for `key` if `predicate` holds for it.
    pub fn remove_if(&self, key: &str, predicate: impl FnOnce(&V) -> bool) -> bool {
        let mut entries = self.lock();
        if entries.peek(key).is_some_and(predicate) {
            entries.pop(key);
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Send + Sync + 'static> CacheMap<Pollable<T>> {
    /// Single-flight lookup: every caller asking for `key` while it is cached or in
    /// flight gets the same pollable, and `start` runs only for the first one.
    ///
    /// Flights still in the air are never evicted. A flight that fails is dropped
    /// from the cache, so the next request for the key starts a fresh one.
    pub fn single_flight(
        self: &Arc<Self>,
        key: &str,
        start: impl FnOnce() -> Pollable<T>,
    ) -> (Pollable<T>, bool) {
        self.single_flight_forgetting(key, start, |_| true)
    }

    /// [`CacheMap::single_flight`] that drops a failed flight only when `forget`
    /// accepts its error. Other failures stay cached and are returned as is.
    pub fn single_flight_forgetting(
        self: &Arc<Self>,
        key: &str,
        start: impl FnOnce() -> Pollable<T>,
        forget: impl Fn(&ResourceError) -> bool + Send + 'static,
    ) -> (Pollable<T>, bool) {
        let (pollable, started) = self.insert_evicting(key, start, Pollable::is_settled);
        if started {
            let cache = Arc::downgrade(self);
            let key = key.to_string();
            let flight = pollable.clone();
            pollable.on_settle(move |outcome| {
                match (outcome, cache.upgrade()) {
                    (Outcome::Failed(err), Some(cache)) if forget(err.as_ref()) => {
                        cache.remove_if(&key, |cached| cached.ptr_eq(&flight));
                    }
                    _ => {}
                }
            });
        }
        (pollable, started)
    }
}

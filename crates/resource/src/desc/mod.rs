//! Descriptor sources: JSON trees addressed by node path.
//!
//! A source answers either synchronously, once an explicit [`SyncDescriptorSource::load`]
//! has completed, or asynchronously through a [`Pollable`] that the frame loop polls.
//! Absent nodes are `Ok(None)`, never errors.

mod composite;
mod dir;
mod file;
mod merge;

pub use composite::*;
pub use dir::*;
pub use file::*;
pub use merge::*;

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{Pollable, ResourceError, Result, path};

/// Sources whose data is fetched up front and then read without waiting.
#[async_trait]
pub trait SyncDescriptorSource: Send + Sync {
    /// Fetches everything the source needs. Calling it again after success is a no-op.
    async fn load(&self) -> Result<()>;

    /// Looks up `path` in the loaded data.
    ///
    /// Fails with [`ResourceError::NotLoaded`] before [`load`](Self::load) completed.
    fn load_desc(&self, path: &str) -> Result<Option<Value>>;
}

/// Sources that fetch lazily on first reference.
pub trait AsyncDescriptorSource: Send + Sync {
    /// Returns a pollable for the node at `path`.
    ///
    /// Repeated calls for data that is already cached return an already-ready pollable.
    /// `Err` is reserved for configuration errors such as an unrouted prefix.
    fn load_desc_async(&self, path: &str) -> Result<Pollable<Option<Value>>>;
}

/// Lookups into documents still in flight, one per key.
///
/// A frame loop asks for the same path every frame until it is ready. Handing back
/// the pending lookup keeps one continuation per key on the document instead of one
/// per call. Entries leave the table as soon as they settle.
#[derive(Default)]
pub(crate) struct PendingLookups {
    pending: Arc<Mutex<HashMap<String, Pollable<Option<Value>>>>>,
}

impl PendingLookups {
    /// The node at `path` inside `document`, ready now if the document already is.
    ///
    /// `key` names the lookup within the loader; it is usually the full path the caller
    /// asked for, of which `path` is the part inside `document`.
    pub(crate) fn resolve_in(
        &self,
        document: &Pollable<Arc<Value>>,
        key: &str,
        path: &str,
    ) -> Pollable<Option<Value>> {
        if let Some(tree) = document.get_result() {
            return Pollable::ready(path::resolve(tree, path).cloned());
        }

        let lookup = {
            let mut pending = lock(&self.pending);
            if let Some(lookup) = pending.get(key) {
                return lookup.clone();
            }
            let path = path.to_string();
            let lookup = document.map(move |tree| path::resolve(tree, &path).cloned());
            pending.insert(key.to_string(), lookup.clone());
            lookup
        };

        // Registered outside the lock: it runs right away if the document settled
        // in the meantime.
        let table = Arc::downgrade(&self.pending);
        let key = key.to_string();
        let registered = lookup.clone();
        lookup.on_settle(move |_| {
            if let Some(table) = table.upgrade() {
                let mut pending = lock(&table);
                if pending.get(&key).is_some_and(|p| p.ptr_eq(&registered)) {
                    pending.remove(&key);
                }
            }
        });
        lookup
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        lock(&self.pending).len()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered prefix table. The first entry whose prefix starts the path wins and receives
/// the path with the prefix stripped.
pub(crate) struct Routes<S: ?Sized> {
    routes: Vec<(String, Arc<S>)>,
}

impl<S: ?Sized> Routes<S> {
    pub(crate) fn new(routes: Vec<(String, Arc<S>)>) -> Self {
        Self { routes }
    }

    pub(crate) fn find<'p>(&self, path: &'p str) -> Option<(&Arc<S>, &'p str)> {
        self.routes.iter().find_map(|(prefix, source)| {
            path.strip_prefix(prefix.as_str())
                .map(|rest| (source, rest))
        })
    }

    pub(crate) fn route<'p>(&self, path: &'p str) -> Result<(&Arc<S>, &'p str)> {
        self.find(path)
            .ok_or_else(|| ResourceError::NoMatchingPrefix(path.to_string()))
    }

    pub(crate) fn sources(&self) -> impl Iterator<Item = &Arc<S>> {
        self.routes.iter().map(|(_, source)| source)
    }

    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn first_matching_prefix_wins() {
        let routes = Routes::new(vec![
            ("Map0/".to_string(), Arc::new(0)),
            ("Map".to_string(), Arc::new(1)),
        ]);
        let (source, rest) = routes.route("Map0/100000000/info").unwrap();
        assert_eq!((**source, rest), (0, "100000000/info"));
        let (source, rest) = routes.route("Map1/100000000").unwrap();
        assert_eq!((**source, rest), (1, "1/100000000"));
        assert!(matches!(
            routes.route("Mob/100100"),
            Err(ResourceError::NoMatchingPrefix(p)) if p == "Mob/100100"
        ));
    }

    #[test]
    fn resolve_in_follows_the_document() {
        let lookups = PendingLookups::default();
        let document = Pollable::pending();
        let bgm = lookups.resolve_in(&document, "100000000/info/bgm", "100000000/info/bgm");
        assert!(!bgm.is_ready());

        document.resolve(Arc::new(json!({ "100000000": { "info": { "bgm": "bgm01" } } })));
        assert_eq!(bgm.get_result(), Some(&Some(json!("bgm01"))));

        let missing = lookups.resolve_in(&document, "100000000/info/nope", "100000000/info/nope");
        assert!(missing.is_ready());
        assert_eq!(missing.get_result(), Some(&None));
    }

    #[test]
    fn repeated_pending_lookups_share_one_cell() {
        let lookups = PendingLookups::default();
        let document = Pollable::pending();
        let first = lookups.resolve_in(&document, "Map1/100000000/info", "100000000/info");
        for _ in 0..60 {
            let again = lookups.resolve_in(&document, "Map1/100000000/info", "100000000/info");
            assert!(again.ptr_eq(&first));
        }
        let other = lookups.resolve_in(&document, "Map1/100000000/back", "100000000/back");
        assert!(!other.ptr_eq(&first));
        assert_eq!(lookups.len(), 2);

        document.resolve(Arc::new(json!({ "100000000": { "info": 1 } })));
        assert_eq!(first.get_result(), Some(&Some(json!(1))));
        assert_eq!(other.get_result(), Some(&None));
        assert_eq!(lookups.len(), 0);
    }

    #[test]
    fn failed_lookups_leave_the_table() {
        let lookups = PendingLookups::default();
        let document = Pollable::<Arc<Value>>::pending();
        let info = lookups.resolve_in(&document, "info", "info");
        document.fail(ResourceError::NotFound("100000000.json".into()));
        assert!(info.is_failed());
        assert_eq!(lookups.len(), 0);
    }
}

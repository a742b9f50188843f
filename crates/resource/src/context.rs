use std::{future::Future, sync::Arc};

use crossbeam_channel::Sender;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::{Bitmap, CachePolicy, Fetcher, Pollable, ResourceEvent, Result, fetch};

/// What every loader needs to reach its backing store: the fetcher, the runtime
/// background fetches are spawned on, the cache policy, and an optional event sink.
///
/// Cloning is cheap; every loader of a registry holds its own clone.
#[derive(Clone)]
pub struct LoaderContext {
    fetcher: Arc<dyn Fetcher>,
    runtime: Handle,
    cache_policy: CachePolicy,
    event_sender: Option<Sender<ResourceEvent>>,
}

impl LoaderContext {
    pub fn new(fetcher: Arc<dyn Fetcher>, runtime: Handle) -> Self {
        Self {
            fetcher,
            runtime,
            cache_policy: CachePolicy::default(),
            event_sender: None,
        }
    }

    /// Context bound to the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current(fetcher: Arc<dyn Fetcher>) -> Self {
        Self::new(fetcher, Handle::current())
    }

    pub fn with_cache_policy(mut self, cache_policy: CachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    /// Attaches a sender receiving a [`ResourceEvent`] for every completed fetch.
    pub fn with_event_sender(mut self, sender: Sender<ResourceEvent>) -> Self {
        self.event_sender = Some(sender);
        self
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache_policy
    }

    pub(crate) fn emit(&self, event: ResourceEvent) {
        if let Some(sender) = &self.event_sender {
            let _ = sender.send(event);
        }
    }

    /// Runs `task` in the background and returns the pollable it settles.
    ///
    /// `what` names the resource in logs and events.
    pub fn spawn<T, F>(&self, what: String, task: F) -> Pollable<T>
    where
        T: Send + Sync + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let pollable = Pollable::pending();
        let target = pollable.clone();
        let ctx = self.clone();
        self.runtime.spawn(async move {
            match task.await {
                Ok(value) => {
                    log::debug!("loaded {}", what);
                    ctx.emit(ResourceEvent::Loaded { url: what });
                    target.resolve(value);
                }
                Err(err) => {
                    log::warn!("failed to load {}: {}", what, err);
                    ctx.emit(ResourceEvent::FetchFailed {
                        url: what,
                        error: err.to_string(),
                    });
                    target.fail(err);
                }
            }
        });
        pollable
    }

    /// Fetches a JSON document in the background.
    pub fn spawn_json(&self, url: String) -> Pollable<Arc<Value>> {
        let fetcher = Arc::clone(&self.fetcher);
        let target = url.clone();
        self.spawn(url, async move {
            fetch::fetch_json(fetcher.as_ref(), &target)
                .await
                .map(Arc::new)
        })
    }

    /// Fetches and decodes an image in the background.
    pub fn spawn_bitmap(&self, url: String) -> Pollable<Arc<Bitmap>> {
        let fetcher = Arc::clone(&self.fetcher);
        let target = url.clone();
        self.spawn(url, async move {
            fetch::fetch_bitmap(fetcher.as_ref(), &target)
                .await
                .map(Arc::new)
        })
    }
}

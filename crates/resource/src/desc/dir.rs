use std::sync::Arc;

use serde_json::Value;

use super::{AsyncDescriptorSource, PendingLookups};
use crate::{CacheMap, LoaderContext, Pollable, Result, path};

/// A directory of JSON shards, one document per first path segment.
///
/// `100000000/info/bgm` fetches `{root}/100000000.json` on first reference and looks up
/// `info/bgm` inside it. Shards are cached per loader; concurrent references to the
/// same shard share one fetch.
pub struct DirLoader {
    root: String,
    ctx: LoaderContext,
    shards: Arc<CacheMap<Pollable<Arc<Value>>>>,
    lookups: PendingLookups,
}

impl DirLoader {
    pub fn new(root: impl Into<String>, ctx: LoaderContext) -> Self {
        let policy = ctx.cache_policy();
        Self {
            root: root.into(),
            ctx,
            shards: Arc::new(CacheMap::new(policy)),
            lookups: PendingLookups::default(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn shard_url(&self, shard: &str) -> String {
        path::join_url(&self.root, &format!("{shard}.json"))
    }

    /// Number of shards currently cached or in flight.
    pub fn cached(&self) -> usize {
        self.shards.len()
    }

    fn shard(&self, shard: &str) -> Pollable<Arc<Value>> {
        let (document, started) = self
            .shards
            .single_flight(shard, || self.ctx.spawn_json(self.shard_url(shard)));
        if started {
            log::debug!("fetching shard {} of {}", shard, self.root);
        }
        document
    }
}

impl AsyncDescriptorSource for DirLoader {
    fn load_desc_async(&self, path: &str) -> Result<Pollable<Option<Value>>> {
        let (shard, rest) = path::split_first(path);
        if shard.is_empty() {
            // The directory itself is not a document.
            return Ok(Pollable::ready(None));
        }
        Ok(self.lookups.resolve_in(&self.shard(shard), path, rest))
    }
}

#[cfg(test)]
mod tests {
    use std::{num::NonZeroUsize, time::Duration};

    use serde_json::json;

    use super::*;
    use crate::{CachePolicy, MemoryFetcher, ResourceError};

    const ROOT: &str = "https://res/Map/Map/Map1";

    async fn settled<T: Send + Sync + 'static>(p: &Pollable<T>) {
        let _ = tokio::time::timeout(Duration::from_secs(1), p.wait()).await;
    }

    #[tokio::test]
    async fn concurrent_lookups_fetch_each_shard_once() {
        let fetcher = Arc::new(MemoryFetcher::gated());
        fetcher.insert_json(
            "https://res/Map/Map/Map1/100000000.json",
            &json!({ "info": { "bgm": "Bgm00/GoPicnic", "mapMark": "Henesys" } }),
        );
        let dir = DirLoader::new(ROOT, LoaderContext::current(fetcher.clone()));

        let lookups: Vec<_> = (0..8)
            .map(|i| {
                let field = if i % 2 == 0 { "info/bgm" } else { "info/mapMark" };
                dir.load_desc_async(&format!("100000000/{field}")).unwrap()
            })
            .collect();
        assert!(lookups.iter().all(|p| !p.is_ready()));
        assert_eq!(dir.cached(), 1);

        fetcher.release();
        for lookup in &lookups {
            settled(lookup).await;
        }
        assert_eq!(lookups[0].get_result(), Some(&Some(json!("Bgm00/GoPicnic"))));
        assert_eq!(lookups[1].get_result(), Some(&Some(json!("Henesys"))));
        assert_eq!(
            fetcher.requests("https://res/Map/Map/Map1/100000000.json"),
            1
        );

        let cached = dir.load_desc_async("100000000/info/bgm").unwrap();
        assert!(cached.is_ready());
        assert_eq!(fetcher.total_requests(), 1);
    }

    #[tokio::test]
    async fn polling_a_pending_path_reuses_the_lookup() {
        let fetcher = Arc::new(MemoryFetcher::gated());
        fetcher.insert_json(
            "https://res/Map/Map/Map1/100000000.json",
            &json!({ "info": { "bgm": "Bgm00/GoPicnic" } }),
        );
        let dir = DirLoader::new(ROOT, LoaderContext::current(fetcher.clone()));

        let first = dir.load_desc_async("100000000/info/bgm").unwrap();
        for _ in 0..120 {
            assert!(dir.load_desc_async("100000000/info/bgm").unwrap().ptr_eq(&first));
        }
        assert_eq!(dir.lookups.len(), 1);

        fetcher.release();
        settled(&first).await;
        assert_eq!(first.get_result(), Some(&Some(json!("Bgm00/GoPicnic"))));
        assert_eq!(dir.lookups.len(), 0);
    }

    #[tokio::test]
    async fn shards_in_flight_survive_a_full_cache() {
        let fetcher = Arc::new(MemoryFetcher::gated());
        for shard in ["a", "b", "c"] {
            fetcher.insert_json(format!("{ROOT}/{shard}.json"), &json!({ "v": shard }));
        }
        let ctx = LoaderContext::current(fetcher.clone())
            .with_cache_policy(CachePolicy::bounded(NonZeroUsize::new(2).unwrap()));
        let dir = DirLoader::new(ROOT, ctx);

        let a = dir.load_desc_async("a/v").unwrap();
        let b = dir.load_desc_async("b/v").unwrap();
        let c = dir.load_desc_async("c/v").unwrap();
        let a_again = dir.load_desc_async("a/v").unwrap();
        assert!(a_again.ptr_eq(&a));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fetcher.requests(&format!("{ROOT}/a.json")), 1);
        assert!(!a.is_settled());

        fetcher.release();
        for lookup in [&a, &b, &c] {
            settled(lookup).await;
        }
        assert_eq!(c.get_result(), Some(&Some(json!("c"))));
        assert_eq!(fetcher.requests(&format!("{ROOT}/a.json")), 1);
    }

    #[tokio::test]
    async fn missing_shard_fails_and_is_refetched() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let dir = DirLoader::new(ROOT, LoaderContext::current(fetcher.clone()));

        let lookup = dir.load_desc_async("123/info").unwrap();
        settled(&lookup).await;
        assert!(lookup.is_failed());
        assert!(matches!(**lookup.error().unwrap(), ResourceError::NotFound(_)));
        assert_eq!(dir.cached(), 0);

        fetcher.insert_json("https://res/Map/Map/Map1/123.json", &json!({ "info": 1 }));
        let retry = dir.load_desc_async("123/info").unwrap();
        settled(&retry).await;
        assert_eq!(retry.get_result(), Some(&Some(json!(1))));
        assert_eq!(fetcher.requests("https://res/Map/Map/Map1/123.json"), 2);
    }

    #[test]
    fn empty_path_is_absent() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let dir = DirLoader::new(
            ROOT,
            LoaderContext::new(Arc::new(MemoryFetcher::new()), rt.handle().clone()),
        );
        let root = dir.load_desc_async("").unwrap();
        assert_eq!(root.get_result(), Some(&None));
        assert_eq!(dir.cached(), 0);
    }
}

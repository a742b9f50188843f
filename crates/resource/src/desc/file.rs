use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::{AsyncDescriptorSource, PendingLookups, SyncDescriptorSource};
use crate::{CacheMap, CachePolicy, LoaderContext, Pollable, ResourceError, Result, path};

/// A single JSON document fetched whole from one URL.
///
/// Supports both access styles: [`load`](SyncDescriptorSource::load) followed by
/// synchronous lookups, or lazy lookups that fetch the document on first reference.
/// Both share the same fetch.
pub struct FileLoader {
    url: String,
    ctx: LoaderContext,
    document: Arc<CacheMap<Pollable<Arc<Value>>>>,
    lookups: PendingLookups,
}

impl FileLoader {
    pub fn new(url: impl Into<String>, ctx: LoaderContext) -> Self {
        Self {
            url: url.into(),
            ctx,
            document: Arc::new(CacheMap::new(CachePolicy::unbounded())),
            lookups: PendingLookups::default(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The document, fetched on first call.
    fn document(&self) -> Pollable<Arc<Value>> {
        let (document, started) = self
            .document
            .single_flight(&self.url, || self.ctx.spawn_json(self.url.clone()));
        if started {
            log::debug!("fetching descriptor file {}", self.url);
        }
        document
    }
}

#[async_trait]
impl SyncDescriptorSource for FileLoader {
    async fn load(&self) -> Result<()> {
        self.document().wait().await?;
        Ok(())
    }

    fn load_desc(&self, path: &str) -> Result<Option<Value>> {
        let tree = self
            .document
            .get(&self.url)
            .and_then(|document| document.get_result().cloned())
            .ok_or_else(|| ResourceError::NotLoaded(self.url.clone()))?;
        Ok(path::resolve(&tree, path).cloned())
    }
}

impl AsyncDescriptorSource for FileLoader {
    fn load_desc_async(&self, path: &str) -> Result<Pollable<Option<Value>>> {
        Ok(self.lookups.resolve_in(&self.document(), path, path))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::MemoryFetcher;

    const URL: &str = "https://res/String.json";

    fn strings() -> Arc<MemoryFetcher> {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert_json(
            URL,
            &json!({ "Map": { "100000000": { "mapName": "Henesys" } } }),
        );
        fetcher
    }

    #[tokio::test]
    async fn lookups_require_load() {
        let fetcher = strings();
        let file = FileLoader::new(URL, LoaderContext::current(fetcher.clone()));

        assert!(matches!(
            file.load_desc("Map/100000000/mapName"),
            Err(ResourceError::NotLoaded(url)) if url == URL
        ));

        file.load().await.unwrap();
        assert_eq!(
            file.load_desc("Map/100000000/mapName").unwrap(),
            Some(json!("Henesys"))
        );
        assert_eq!(file.load_desc("Map/999").unwrap(), None);
        assert!(file.load_desc("").unwrap().is_some_and(|tree| tree.is_object()));

        file.load().await.unwrap();
        assert_eq!(fetcher.requests(URL), 1);
    }

    #[tokio::test]
    async fn lazy_lookups_share_the_fetch() {
        let fetcher = Arc::new(MemoryFetcher::gated());
        fetcher.insert_json(URL, &json!({ "Mob": { "100100": "Snail" } }));
        let file = FileLoader::new(URL, LoaderContext::current(fetcher.clone()));

        let snail = file.load_desc_async("Mob/100100").unwrap();
        let again = file.load_desc_async("Mob/100100").unwrap();
        assert!(!snail.is_ready());
        assert!(again.ptr_eq(&snail));

        fetcher.release();
        let value = tokio::time::timeout(Duration::from_secs(1), snail.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, &Some(json!("Snail")));
        tokio::time::timeout(Duration::from_secs(1), again.wait())
            .await
            .unwrap()
            .unwrap();

        let cached = file.load_desc_async("Mob/100100").unwrap();
        assert!(cached.is_ready());
        assert_eq!(fetcher.requests(URL), 1);
    }

    #[tokio::test]
    async fn failed_load_can_be_retried() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let file = FileLoader::new(URL, LoaderContext::current(fetcher.clone()));

        let err = file.load().await.unwrap_err();
        assert!(matches!(
            err,
            ResourceError::Shared(ref inner) if matches!(**inner, ResourceError::NotFound(_))
        ));

        fetcher.insert_json(URL, &json!({ "ok": true }));
        file.load().await.unwrap();
        assert_eq!(file.load_desc("ok").unwrap(), Some(json!(true)));
        assert_eq!(fetcher.requests(URL), 2);
    }
}

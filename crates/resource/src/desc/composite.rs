use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;

use super::{AsyncDescriptorSource, Routes, SyncDescriptorSource};
use crate::{Pollable, Result};

/// Routes lookups by path prefix to eagerly loaded children.
///
/// Routes are tried in order and the first prefix that starts the path wins; the
/// child sees the path with the prefix removed. A path no prefix matches is a
/// configuration error.
pub struct CompositeLoader {
    routes: Routes<dyn SyncDescriptorSource>,
}

impl CompositeLoader {
    pub fn new(routes: Vec<(String, Arc<dyn SyncDescriptorSource>)>) -> Self {
        Self {
            routes: Routes::new(routes),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SyncDescriptorSource for CompositeLoader {
    /// Loads every child concurrently. Fails if any child fails.
    async fn load(&self) -> Result<()> {
        try_join_all(self.routes.sources().map(|child| child.load())).await?;
        Ok(())
    }

    fn load_desc(&self, path: &str) -> Result<Option<Value>> {
        let (child, rest) = self.routes.route(path)?;
        child.load_desc(rest)
    }
}

/// Lazy counterpart of [`CompositeLoader`].
pub struct CompositeAsyncLoader {
    routes: Routes<dyn AsyncDescriptorSource>,
}

impl CompositeAsyncLoader {
    pub fn new(routes: Vec<(String, Arc<dyn AsyncDescriptorSource>)>) -> Self {
        Self {
            routes: Routes::new(routes),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AsyncDescriptorSource for CompositeAsyncLoader {
    fn load_desc_async(&self, path: &str) -> Result<Pollable<Option<Value>>> {
        let (child, rest) = self.routes.route(path)?;
        child.load_desc_async(rest)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::{DirLoader, FileLoader, LoaderContext, MemoryFetcher, ResourceError};

    fn file(url: &str, ctx: &LoaderContext) -> Arc<dyn SyncDescriptorSource> {
        Arc::new(FileLoader::new(url, ctx.clone()))
    }

    fn dir(root: &str, ctx: &LoaderContext) -> Arc<dyn AsyncDescriptorSource> {
        Arc::new(DirLoader::new(root, ctx.clone()))
    }

    #[tokio::test]
    async fn sync_composite_routes_to_loaded_children() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert_json(
            "https://res/String/Map.json",
            &json!({ "victoria": { "100000000": { "mapName": "Henesys" } } }),
        );
        fetcher.insert_json(
            "https://res/String/Mob.json",
            &json!({ "100100": { "name": "Snail" } }),
        );
        let ctx = LoaderContext::current(fetcher.clone());

        let composite = CompositeLoader::new(vec![
            ("Map/".into(), file("https://res/String/Map.json", &ctx)),
            ("Mob/".into(), file("https://res/String/Mob.json", &ctx)),
        ]);
        assert!(matches!(
            composite.load_desc("Mob/100100/name"),
            Err(ResourceError::NotLoaded(_))
        ));

        composite.load().await.unwrap();
        assert_eq!(
            composite.load_desc("Map/victoria/100000000/mapName").unwrap(),
            Some(json!("Henesys"))
        );
        assert_eq!(
            composite.load_desc("Mob/100100/name").unwrap(),
            Some(json!("Snail"))
        );
        assert_eq!(composite.load_desc("Mob/0").unwrap(), None);
        assert!(matches!(
            composite.load_desc("Npc/2000"),
            Err(ResourceError::NoMatchingPrefix(_))
        ));
    }

    #[tokio::test]
    async fn sync_composite_load_fails_with_a_child() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert_json("https://res/String/Map.json", &json!({}));
        let ctx = LoaderContext::current(fetcher);
        let composite = CompositeLoader::new(vec![
            ("Map/".into(), file("https://res/String/Map.json", &ctx)),
            ("Mob/".into(), file("https://res/String/Mob.json", &ctx)),
        ]);
        assert!(composite.load().await.is_err());
    }

    #[tokio::test]
    async fn async_composite_routes_to_shards() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert_json(
            "https://res/Map/Map/Map1/100000000.json",
            &json!({ "info": { "bgm": "bgm01" } }),
        );
        let ctx = LoaderContext::current(fetcher.clone());
        let composite = CompositeAsyncLoader::new(vec![
            ("Map0/".into(), dir("https://res/Map/Map/Map0", &ctx)),
            ("Map1/".into(), dir("https://res/Map/Map/Map1", &ctx)),
        ]);

        let bgm = composite.load_desc_async("Map1/100000000/info/bgm").unwrap();
        let value = tokio::time::timeout(Duration::from_secs(1), bgm.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, &Some(json!("bgm01")));
        assert_eq!(fetcher.requests("https://res/Map/Map/Map0/100000000.json"), 0);

        assert!(matches!(
            composite.load_desc_async("Map9/100000000"),
            Err(ResourceError::NoMatchingPrefix(_))
        ));
        assert_eq!(fetcher.total_requests(), 1);
    }
}

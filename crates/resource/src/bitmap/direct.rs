use std::sync::Arc;

use crate::{Bitmap, BitmapHandle, CacheMap, ImageLoader, LoaderContext, Pollable, path};

/// How an image id maps to a location under the loader root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageNaming {
    /// `{root}/{id}.png`
    ById,
    /// `{root}/{path}.png`, unless the path already ends in `.png`. Resource paths such
    /// as `Map/Back/grassySoil.img` carry dots that are not image extensions.
    ByPath,
}

/// One remote image per id.
pub struct DirectImageLoader {
    root: String,
    naming: ImageNaming,
    ctx: LoaderContext,
    images: Arc<CacheMap<Pollable<Arc<Bitmap>>>>,
}

impl DirectImageLoader {
    pub fn new(root: impl Into<String>, naming: ImageNaming, ctx: LoaderContext) -> Self {
        let images = Arc::new(CacheMap::new(ctx.cache_policy()));
        Self {
            root: root.into(),
            naming,
            ctx,
            images,
        }
    }

    /// Images named `{root}/{bid}.png`.
    pub fn by_id(root: impl Into<String>, ctx: LoaderContext) -> Self {
        Self::new(root, ImageNaming::ById, ctx)
    }

    /// Images addressed by a root-relative path.
    pub fn by_path(root: impl Into<String>, ctx: LoaderContext) -> Self {
        Self::new(root, ImageNaming::ByPath, ctx)
    }

    pub fn url_for(&self, id: &str) -> String {
        match self.naming {
            ImageNaming::ById => path::join_url(&self.root, &format!("{id}.png")),
            ImageNaming::ByPath if id.ends_with(".png") => path::join_url(&self.root, id),
            ImageNaming::ByPath => path::join_url(&self.root, &format!("{id}.png")),
        }
    }

    pub fn cached(&self) -> usize {
        self.images.len()
    }
}

impl ImageLoader for DirectImageLoader {
    fn load_image(&self, id: &str) -> BitmapHandle {
        let (cell, started) = self
            .images
            .single_flight(id, || self.ctx.spawn_bitmap(self.url_for(id)));
        if started {
            log::debug!("image {} requested from {}", id, self.root);
        }
        BitmapHandle::from(cell)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{MemoryFetcher, bitmap::test_util::png};

    fn loader(fetcher: &Arc<MemoryFetcher>, naming: ImageNaming) -> DirectImageLoader {
        let ctx = LoaderContext::current(fetcher.clone());
        DirectImageLoader::new("https://res/Map/bitmaps", naming, ctx)
    }

    #[tokio::test]
    async fn urls_follow_the_naming() {
        let fetcher = Arc::new(MemoryFetcher::new());

        let by_id = loader(&fetcher, ImageNaming::ById);
        assert_eq!(by_id.url_for("1234"), "https://res/Map/bitmaps/1234.png");

        let by_path = loader(&fetcher, ImageNaming::ByPath);
        assert_eq!(by_path.url_for("UI/cursor"), "https://res/Map/bitmaps/UI/cursor.png");
        assert_eq!(by_path.url_for("UI/cursor.png"), "https://res/Map/bitmaps/UI/cursor.png");
    }

    #[tokio::test]
    async fn dotted_resource_paths_still_get_png() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let by_path = DirectImageLoader::by_path("https://res", LoaderContext::current(fetcher));
        assert_eq!(
            by_path.url_for("Map/Back/grassySoil.img"),
            "https://res/Map/Back/grassySoil.img.png"
        );
        assert_eq!(
            by_path.url_for("Map/Tile/woodMarble.img/bsc/0"),
            "https://res/Map/Tile/woodMarble.img/bsc/0.png"
        );
    }

    #[tokio::test]
    async fn handle_is_stable_and_fetched_once() {
        let fetcher = Arc::new(MemoryFetcher::new());
        fetcher.insert("https://res/Map/bitmaps/1234.png", png(12, 8));
        let images = loader(&fetcher, ImageNaming::ById);

        let first = images.load_image("1234");
        let second = images.load_image("1234");
        assert!(first.loading());
        assert!(first.ptr_eq(&second));

        tokio::time::timeout(Duration::from_secs(1), first.pollable().wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!second.loading());
        assert_eq!((second.width(), second.height()), (Some(12), Some(8)));
        assert!(images.load_image("1234").ptr_eq(&first));
        assert_eq!(fetcher.requests("https://res/Map/bitmaps/1234.png"), 1);
    }

    #[tokio::test]
    async fn failed_images_are_fetched_again() {
        let fetcher = Arc::new(MemoryFetcher::new());
        let images = loader(&fetcher, ImageNaming::ById);

        let missing = images.load_image("404");
        let _ = tokio::time::timeout(Duration::from_secs(1), missing.pollable().wait()).await;
        assert!(missing.is_failed());
        assert!(!missing.loading());
        assert_eq!(images.cached(), 0);

        fetcher.insert("https://res/Map/bitmaps/404.png", png(1, 1));
        let retry = images.load_image("404");
        assert!(!retry.ptr_eq(&missing));
        tokio::time::timeout(Duration::from_secs(1), retry.pollable().wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetcher.requests("https://res/Map/bitmaps/404.png"), 2);
    }
}

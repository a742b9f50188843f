//! Atlas based images.
//!
//! A reference `atlasPath#region` points at one region of a packed spritesheet: a
//! manifest `{atlasPath}.json` in the usual `{frames: {"<region>.png": {frame:
//! {x, y, w, h}}}, meta: {...}}` shape, next to the packed `{atlasPath}.png`. The
//! first reference to an atlas fetches both, decodes the sheet once and copies every
//! region into its own bitmap. References without `#` are plain images addressed by
//! path.

use std::{collections::HashMap, sync::Arc};

use anyhow::anyhow;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    Bitmap, BitmapHandle, CacheMap, DirectImageLoader, ImageLoader, LoaderContext, Pollable,
    ResourceError, ResourceEvent, Result, path,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct FrameRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

#[derive(Debug, Deserialize)]
struct FrameEntry {
    frame: FrameRect,
}

#[derive(Debug, Deserialize)]
struct NamedFrameEntry {
    filename: String,
    frame: FrameRect,
}

/// TexturePacker writes frames either as a map keyed by file name or as an array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Frames {
    Hash(HashMap<String, FrameEntry>),
    Array(Vec<NamedFrameEntry>),
}

#[derive(Debug, Deserialize)]
pub struct AtlasManifest {
    frames: Frames,
    #[serde(default)]
    meta: Value,
}

impl AtlasManifest {
    pub fn from_json(url: &str, bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|source| ResourceError::Json {
            url: url.to_string(),
            source,
        })
    }

    /// Region rectangles keyed by reference name (`.png` suffix stripped).
    pub fn regions(&self) -> Vec<(String, FrameRect)> {
        let strip = |name: &str| name.strip_suffix(".png").unwrap_or(name).to_string();
        match &self.frames {
            Frames::Hash(frames) => frames
                .iter()
                .map(|(name, entry)| (strip(name), entry.frame))
                .collect(),
            Frames::Array(frames) => frames
                .iter()
                .map(|entry| (strip(&entry.filename), entry.frame))
                .collect(),
        }
    }

    pub fn meta(&self) -> &Value {
        &self.meta
    }
}

/// A decomposed spritesheet: one independent bitmap per region.
#[derive(Debug)]
pub struct Atlas {
    regions: HashMap<String, Arc<Bitmap>>,
}

impl Atlas {
    /// Splits `sheet` into the regions declared by `manifest`.
    pub fn decompose(sheet: &Bitmap, manifest: &AtlasManifest) -> Self {
        let regions = manifest
            .regions()
            .into_iter()
            .map(|(name, rect)| {
                if rect.x.saturating_add(rect.w) > sheet.width()
                    || rect.y.saturating_add(rect.h) > sheet.height()
                {
                    log::warn!(
                        "region {} ({:?}) exceeds the {}x{} sheet, clamping",
                        name,
                        rect,
                        sheet.width(),
                        sheet.height()
                    );
                }
                let bitmap = sheet.crop(rect.x, rect.y, rect.w, rect.h);
                (name, Arc::new(bitmap))
            })
            .collect();
        Self { regions }
    }

    pub fn region(&self, name: &str) -> Option<&Arc<Bitmap>> {
        self.regions.get(name)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Images addressed by path, with `atlas#region` references served from spritesheets.
pub struct SpritesheetImageLoader {
    root: String,
    ctx: LoaderContext,
    atlases: Arc<CacheMap<Pollable<Arc<Atlas>>>>,
    regions: Arc<CacheMap<Pollable<Arc<Bitmap>>>>,
    direct: DirectImageLoader,
}

impl SpritesheetImageLoader {
    pub fn new(root: impl Into<String>, ctx: LoaderContext) -> Self {
        let root = root.into();
        let policy = ctx.cache_policy();
        Self {
            direct: DirectImageLoader::by_path(root.clone(), ctx.clone()),
            root,
            ctx,
            atlases: Arc::new(CacheMap::new(policy)),
            regions: Arc::new(CacheMap::new(policy)),
        }
    }

    /// The decomposed atlas at `atlas_path`, fetched on first use.
    ///
    /// Concurrent first references share a single manifest and sheet fetch and a single
    /// decomposition pass.
    pub fn atlas(&self, atlas_path: &str) -> Pollable<Arc<Atlas>> {
        let (atlas, started) = self
            .atlases
            .single_flight(atlas_path, || self.spawn_decomposition(atlas_path));
        if started {
            log::debug!("atlas {} requested from {}", atlas_path, self.root);
        }
        atlas
    }

    fn spawn_decomposition(&self, atlas_path: &str) -> Pollable<Arc<Atlas>> {
        let manifest_url = path::join_url(&self.root, &format!("{atlas_path}.json"));
        let sheet_url = path::join_url(&self.root, &format!("{atlas_path}.png"));
        let fetcher = Arc::clone(self.ctx.fetcher());
        let ctx = self.ctx.clone();
        let atlas_name = atlas_path.to_string();

        self.ctx
            .spawn(path::join_url(&self.root, atlas_path), async move {
                let (manifest, sheet) =
                    tokio::try_join!(fetcher.fetch(&manifest_url), fetcher.fetch(&sheet_url))?;

                let atlas = tokio::task::spawn_blocking(move || -> Result<Atlas> {
                    let manifest = AtlasManifest::from_json(&manifest_url, &manifest)?;
                    let sheet = Bitmap::decode(&sheet_url, &sheet)?;
                    Ok(Atlas::decompose(&sheet, &manifest))
                })
                .await
                .map_err(|err| anyhow!("decomposition of {} panicked: {}", atlas_name, err))??;

                log::info!("atlas {} split into {} regions", atlas_name, atlas.len());
                ctx.emit(ResourceEvent::AtlasDecomposed {
                    atlas: atlas_name,
                    regions: atlas.len(),
                });
                Ok::<_, ResourceError>(Arc::new(atlas))
            })
    }
}

impl ImageLoader for SpritesheetImageLoader {
    fn load_image(&self, reference: &str) -> BitmapHandle {
        let Some((atlas_path, region)) = reference.split_once('#') else {
            return self.direct.load_image(reference);
        };

        // A region missing from a decomposed atlas stays missing; only a failed atlas
        // fetch is worth retrying.
        let (cell, _) = self.regions.single_flight_forgetting(
            reference,
            || {
                let atlas_name = atlas_path.to_string();
                let region = region.to_string();
                self.atlas(atlas_path).try_map(move |atlas| {
                    atlas.region(&region).cloned().ok_or_else(|| {
                        log::warn!("atlas {} has no region {}", atlas_name, region);
                        ResourceError::MissingRegion {
                            atlas: atlas_name,
                            region,
                        }
                    })
                })
            },
            |err| !matches!(err, ResourceError::MissingRegion { .. }),
        );
        BitmapHandle::from(cell)
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::OnceCell;

use super::{AsyncDescriptorSource, DirLoader, PendingLookups, Routes, SyncDescriptorSource};
use crate::{LoaderContext, Pollable, ResourceError, Result, fetch, path};

/// Where a piece of a merged tree comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum MergeMapping {
    /// `{base}/{filename}` is fetched on load and grafted at `nodepath`.
    File { nodepath: String, filename: String },
    /// Paths under `nodepath/` are served lazily from shards in `{base}/{folder}`.
    Folder { nodepath: String, folder: String },
}

impl MergeMapping {
    pub fn nodepath(&self) -> &str {
        match self {
            MergeMapping::File { nodepath, .. } | MergeMapping::Folder { nodepath, .. } => {
                nodepath
            }
        }
    }
}

/// Builds one virtual tree out of many small files, with large subtrees left as lazily
/// fetched folders.
///
/// Files are fetched together by [`load`](SyncDescriptorSource::load) and grafted in
/// mapping order, so a later mapping wins where two overlap. Overlapping loads share
/// one set of fetches. Lookups under a folder
/// nodepath go to that folder's shards instead of the tree.
pub struct MergeLoader {
    base: String,
    ctx: LoaderContext,
    files: Vec<(String, String)>,
    folders: Routes<DirLoader>,
    tree: Pollable<Arc<Value>>,
    loaded: OnceCell<()>,
    lookups: PendingLookups,
}

impl MergeLoader {
    pub fn new(base: impl Into<String>, mappings: Vec<MergeMapping>, ctx: LoaderContext) -> Self {
        let base = base.into();
        let mut files = Vec::new();
        let mut folders = Vec::new();
        for mapping in mappings {
            match mapping {
                MergeMapping::File { nodepath, filename } => {
                    files.push((nodepath, path::join_url(&base, &filename)));
                }
                MergeMapping::Folder { nodepath, folder } => {
                    let dir = DirLoader::new(path::join_url(&base, &folder), ctx.clone());
                    folders.push((format!("{nodepath}/"), Arc::new(dir)));
                }
            }
        }
        Self {
            base,
            ctx,
            files,
            folders: Routes::new(folders),
            tree: Pollable::pending(),
            loaded: OnceCell::new(),
            lookups: PendingLookups::default(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn is_loaded(&self) -> bool {
        self.tree.is_ready()
    }
}

impl MergeLoader {
    async fn merge_files(&self) -> Result<()> {
        let fetcher = self.ctx.fetcher().as_ref();
        let documents = try_join_all(
            self.files
                .iter()
                .map(|(_, url)| fetch::fetch_json(fetcher, url)),
        )
        .await?;

        let mut tree = Value::Object(Map::new());
        for ((nodepath, _), document) in self.files.iter().zip(documents) {
            path::graft(&mut tree, nodepath, document);
        }
        log::info!(
            "merged {} files and {} folders under {}",
            self.files.len(),
            self.folders.len(),
            self.base
        );
        self.tree.resolve(Arc::new(tree));
        Ok(())
    }
}

#[async_trait]
impl SyncDescriptorSource for MergeLoader {
    /// Callers arriving while a load runs wait for it instead of fetching again. A
    /// failed load leaves the tree pending, so `load` may be called again.
    async fn load(&self) -> Result<()> {
        self.loaded.get_or_try_init(|| self.merge_files()).await?;
        Ok(())
    }

    fn load_desc(&self, path: &str) -> Result<Option<Value>> {
        let tree = self
            .tree
            .get_result()
            .ok_or_else(|| ResourceError::NotLoaded(self.base.clone()))?;
        Ok(path::resolve(tree, path).cloned())
    }
}

impl AsyncDescriptorSource for MergeLoader {
    /// Folder paths fetch their shard on demand; everything else resolves against the
    /// merged tree and stays pending until [`load`](SyncDescriptorSource::load) ran.
    fn load_desc_async(&self, path: &str) -> Result<Pollable<Option<Value>>> {
        if let Some((folder, rest)) = self.folders.find(path) {
            return folder.load_desc_async(rest);
        }
        Ok(self.lookups.resolve_in(&self.tree, path, path))
    }
}

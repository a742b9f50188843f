//! TOML description of a resource registry.
//!
//! ```toml
//! [fetcher]
//! kind = "http"
//! timeout_ms = 10000
//!
//! [cache]
//! max_entries = 4096
//!
//! [images.default]
//! kind = "path"
//! root = "https://maple-res.kkkiiox.work"
//!
//! [[loader]]
//! name = "string"
//! kind = "file"
//! url = "https://maple-res.kkkiiox.work/String/nx.json"
//!
//! [[loader]]
//! name = "mapx"
//! kind = "composite_async"
//! images = "default"
//! routes = [
//!     { prefix = "Map0/", root = "https://maple-res.kkkiiox.work/Map/Map0" },
//! ]
//! ```

use std::{
    collections::{BTreeMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::Deserialize;

use crate::{
    CachePolicy, Fetcher, FsFetcher, HttpFetcher, MergeMapping, ResourceError, Result,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub cache: CachePolicy,
    #[serde(default)]
    pub images: BTreeMap<String, ImageLoaderConfig>,
    #[serde(default, rename = "loader")]
    pub loaders: Vec<LoaderConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FetcherConfig {
    Http {
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
        #[serde(default = "default_max_retries")]
        max_retries: u32,
        #[serde(default = "default_retry_backoff_ms")]
        retry_backoff_ms: u64,
    },
    /// A local mirror of the asset server.
    Fs { root: PathBuf },
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    250
}

impl Default for FetcherConfig {
    fn default() -> Self {
        FetcherConfig::Http {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl FetcherConfig {
    pub fn build(&self) -> Result<Arc<dyn Fetcher>> {
        Ok(match self {
            FetcherConfig::Http {
                timeout_ms,
                max_retries,
                retry_backoff_ms,
            } => Arc::new(HttpFetcher::new(
                Duration::from_millis(*timeout_ms),
                *max_retries,
                Duration::from_millis(*retry_backoff_ms),
            )?),
            FetcherConfig::Fs { root } => Arc::new(FsFetcher::new(root)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageLoaderConfig {
    /// `{root}/{id}.png`.
    Bid { root: String },
    /// `{root}/{path}.png`, plus `atlas#region` references into spritesheets.
    Path { root: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoaderConfig {
    pub name: String,
    /// Name of an entry of `[images]` serving this loader's images.
    #[serde(default)]
    pub images: Option<String>,
    #[serde(flatten)]
    pub source: SourceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    File { url: String },
    Dir { root: String },
    Composite { routes: Vec<FileRoute> },
    CompositeAsync { routes: Vec<AsyncRoute> },
    Merge { base: String, mappings: Vec<MergeMapping> },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileRoute {
    pub prefix: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AsyncRoute {
    Dir { prefix: String, root: String },
    File { prefix: String, url: String },
}

impl AsyncRoute {
    pub fn prefix(&self) -> &str {
        match self {
            AsyncRoute::Dir { prefix, .. } | AsyncRoute::File { prefix, .. } => prefix,
        }
    }
}

impl ResourceConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ResourceConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ResourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("reading resource configuration from {:?}", path);
        Self::from_toml_str(&text)
    }

    /// Checks what serde cannot: unique loader names, declared image loaders and
    /// non-empty route tables.
    pub fn validate(&self) -> Result<()> {
        let mut names = HashSet::new();
        for loader in &self.loaders {
            if !names.insert(loader.name.as_str()) {
                return Err(ResourceError::Config(format!(
                    "loader `{}` is declared twice",
                    loader.name
                )));
            }
            if let Some(images) = loader
                .images
                .as_ref()
                .filter(|images| !self.images.contains_key(*images))
            {
                return Err(ResourceError::Config(format!(
                    "loader `{}` uses undeclared image loader `{}`",
                    loader.name, images
                )));
            }
            let empty = match &loader.source {
                SourceConfig::Composite { routes } => routes.is_empty(),
                SourceConfig::CompositeAsync { routes } => routes.is_empty(),
                _ => false,
            };
            if empty {
                return Err(ResourceError::Config(format!(
                    "composite loader `{}` has no routes",
                    loader.name
                )));
            }
        }
        Ok(())
    }
}

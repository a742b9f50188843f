//! Backing stores the loaders fetch from.
//!
//! - `Fetcher` is a trait object (Send + Sync) resolving a location to raw bytes.
//! - `HttpFetcher` talks to the asset server, with a request timeout and a small
//!   number of retries.
//! - `FsFetcher` serves a local mirror of the asset server from a root directory.
//! - `MemoryFetcher` keeps everything in RAM; it counts requests and can hold them
//!   open, which is what the single-flight tests rely on.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::{Bitmap, ResourceError, Result};

#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    /// Fetches the raw bytes stored at `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;

    /// Name (for logs).
    fn name(&self) -> &str;
}

/// Fetches and parses a JSON document.
pub async fn fetch_json(fetcher: &dyn Fetcher, url: &str) -> Result<Value> {
    let bytes = fetcher.fetch(url).await?;
    serde_json::from_slice(&bytes).map_err(|source| ResourceError::Json {
        url: url.to_string(),
        source,
    })
}

/// Fetches and decodes an image into an RGBA bitmap.
pub async fn fetch_bitmap(fetcher: &dyn Fetcher, url: &str) -> Result<Bitmap> {
    let bytes = fetcher.fetch(url).await?;
    Bitmap::decode(url, &bytes)
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
    retry_backoff: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_retries: u32, retry_backoff: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            max_retries,
            retry_backoff,
        })
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) if attempt < self.max_retries && is_transient(&err) => {
                    attempt += 1;
                    log::warn!(
                        "GET {} failed ({}), retry {}/{}",
                        url,
                        err,
                        attempt,
                        self.max_retries
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Whether a failed request may be retried. 4xx responses are final.
fn is_transient(err: &ResourceError) -> bool {
    match err {
        ResourceError::Http(err) => !err.status().is_some_and(|status| status.is_client_error()),
        _ => false,
    }
}

/// Serves locations as paths relative to a root directory.
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    /// Example: `FsFetcher::new("/home/me/maple-res")`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsFetcher { root: root.into() }
    }

    fn resolve_path(&self, url: &str) -> PathBuf {
        let rel = Path::new(url.trim_start_matches('/'));
        self.root.join(rel)
    }
}

#[async_trait]
impl Fetcher for FsFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let path = self.resolve_path(url);
        tokio::fs::read(&path)
            .await
            .map_err(|source| ResourceError::Io { path, source })
    }

    fn name(&self) -> &str {
        "fs"
    }
}

/// In-memory store keyed by the exact location string.
pub struct MemoryFetcher {
    content: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl Default for MemoryFetcher {
    fn default() -> Self {
        let (gate, _) = watch::channel(true);
        MemoryFetcher {
            content: Mutex::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
            total: AtomicUsize::new(0),
            gate,
        }
    }
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fetcher whose requests stay pending until [`MemoryFetcher::release`].
    pub fn gated() -> Self {
        let fetcher = Self::default();
        fetcher.gate.send_replace(false);
        fetcher
    }

    pub fn insert(&self, url: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), data.into());
    }

    pub fn insert_json(&self, url: impl Into<String>, value: &Value) {
        self.insert(url, value.to_string());
    }

    /// Lets every held and future request through.
    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Number of requests issued for `url`.
    pub fn requests(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        *self
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(url.to_string())
            .or_default() += 1;
        self.total.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        self.content
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
            .ok_or_else(|| ResourceError::NotFound(url.to_string()))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn fs_fetcher_reads_relative_to_root() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("maple-res");
        std::fs::create_dir_all(root.join("Map/Map0")).unwrap();
        std::fs::write(root.join("Map/Map0/100000000.json"), r#"{"info":{"bgm":"bgm01"}}"#)
            .unwrap();

        let fetcher = FsFetcher::new(&root);
        let doc = fetch_json(&fetcher, "/Map/Map0/100000000.json").await.unwrap();
        assert_eq!(doc, json!({ "info": { "bgm": "bgm01" } }));
    }

    #[tokio::test]
    async fn fs_fetcher_reports_missing_files() {
        let dir = tempdir().unwrap();
        let fetcher = FsFetcher::new(dir.path());
        let err = fetcher.fetch("Map/nope.json").await.unwrap_err();
        assert!(matches!(err, ResourceError::Io { .. }));
    }

    #[tokio::test]
    async fn memory_fetcher_counts_requests() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert_json("String/nx.json", &json!({ "Map": {} }));

        fetch_json(&fetcher, "String/nx.json").await.unwrap();
        fetch_json(&fetcher, "String/nx.json").await.unwrap();
        let missing = fetcher.fetch("String/other.json").await;

        assert_eq!(fetcher.requests("String/nx.json"), 2);
        assert_eq!(fetcher.total_requests(), 3);
        assert!(matches!(missing, Err(ResourceError::NotFound(_))));
    }

    #[tokio::test]
    async fn invalid_json_is_reported_with_its_url() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert("broken.json", "{ not json");
        let err = fetch_json(&fetcher, "broken.json").await.unwrap_err();
        assert!(matches!(err, ResourceError::Json { ref url, .. } if url == "broken.json"));
    }

    #[tokio::test]
    async fn gated_fetcher_holds_requests() {
        let fetcher = Arc::new(MemoryFetcher::gated());
        fetcher.insert("a.json", "1");

        let task = {
            let fetcher = Arc::clone(&fetcher);
            tokio::spawn(async move { fetcher.fetch("a.json").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());
        assert_eq!(fetcher.requests("a.json"), 1);

        fetcher.release();
        assert_eq!(task.await.unwrap().unwrap(), b"1".to_vec());
    }
}

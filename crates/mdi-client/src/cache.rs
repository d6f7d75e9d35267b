//! HTTP response cache: in-process (moka) or on disk.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mdi_core::config::{CacheBackend, CacheConfig};
use mdi_core::error::AppError;
use mdi_core::models::compute_hash;
use moka::future::Cache;
use serde::{Deserialize, Serialize};

/// A stored 2xx response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub url: String,
    pub status: u16,
    /// `Content-Type` header, kept for charset decoding.
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Sidecar metadata of a filesystem entry; the body lives next to it.
#[derive(Serialize, Deserialize)]
struct EntryMeta {
    url: String,
    status: u16,
    #[serde(default)]
    content_type: Option<String>,
    stored_at: i64,
}

#[derive(Clone)]
pub enum ResponseCache {
    Memory(Cache<String, Arc<CachedResponse>>),
    Filesystem(FsCache),
}

impl ResponseCache {
    /// `None` when caching is disabled.
    pub fn from_config(config: &CacheConfig) -> Result<Option<Self>, AppError> {
        if !config.enabled {
            return Ok(None);
        }
        let cache = match config.backend {
            CacheBackend::Memory => Self::memory(config.expire_after()),
            CacheBackend::Filesystem => {
                Self::filesystem(config.path.clone(), config.expire_after())?
            }
        };
        Ok(Some(cache))
    }

    pub fn memory(ttl: Duration) -> Self {
        ResponseCache::Memory(Cache::builder().time_to_live(ttl).build())
    }

    pub fn filesystem(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self, AppError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            AppError::ConfigError(format!("Cannot create cache dir {}: {e}", dir.display()))
        })?;
        Ok(ResponseCache::Filesystem(FsCache { dir, ttl }))
    }

    /// Key for a GET request: SHA-256 of the method, URL and sorted params.
    pub fn key(url: &str, params: &[(String, String)]) -> String {
        let mut params: Vec<_> = params.iter().collect();
        params.sort();
        let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        compute_hash(&format!("GET {url}?{}", query.join("&")))
    }

    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        match self {
            ResponseCache::Memory(cache) => cache.get(key).await.map(|r| r.as_ref().clone()),
            ResponseCache::Filesystem(fs) => fs.get(key).await,
        }
    }

    pub async fn put(&self, key: &str, response: CachedResponse) {
        match self {
            ResponseCache::Memory(cache) => {
                cache.insert(key.to_string(), Arc::new(response)).await;
            }
            ResponseCache::Filesystem(fs) => fs.put(key, response).await,
        }
    }
}

/// One `<key>.json` metadata file and one `<key>.body` file per entry.
#[derive(Debug, Clone)]
pub struct FsCache {
    dir: PathBuf,
    ttl: Duration,
}

impl FsCache {
    fn paths(&self, key: &str) -> (PathBuf, PathBuf) {
        (
            self.dir.join(format!("{key}.json")),
            self.dir.join(format!("{key}.body")),
        )
    }

    async fn get(&self, key: &str) -> Option<CachedResponse> {
        let (meta_path, body_path) = self.paths(key);
        let raw = tokio::fs::read(&meta_path).await.ok()?;
        let meta: EntryMeta = match serde_json::from_slice(&raw) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::debug!(path = %meta_path.display(), error = %e, "Corrupt cache entry");
                return None;
            }
        };

        let age = Utc::now().timestamp().saturating_sub(meta.stored_at);
        if age < 0 || age as u64 > self.ttl.as_secs() {
            tracing::trace!(url = %meta.url, age, "Cache entry expired");
            let _ = tokio::fs::remove_file(&meta_path).await;
            let _ = tokio::fs::remove_file(&body_path).await;
            return None;
        }

        let body = tokio::fs::read(&body_path).await.ok()?;
        Some(CachedResponse {
            url: meta.url,
            status: meta.status,
            content_type: meta.content_type,
            body,
        })
    }

    async fn put(&self, key: &str, response: CachedResponse) {
        let (meta_path, body_path) = self.paths(key);
        let meta = EntryMeta {
            url: response.url,
            status: response.status,
            content_type: response.content_type,
            stored_at: Utc::now().timestamp(),
        };
        let meta = match serde_json::to_vec(&meta) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode cache entry");
                return;
            }
        };

        // Body first: a metadata file without its body reads as a miss.
        if let Err(e) = tokio::fs::write(&body_path, &response.body).await {
            tracing::warn!(path = %body_path.display(), error = %e, "Failed to write cache body");
            return;
        }
        if let Err(e) = tokio::fs::write(&meta_path, meta).await {
            tracing::warn!(path = %meta_path.display(), error = %e, "Failed to write cache entry");
        }
    }
}

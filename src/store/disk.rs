//! Cache storage persisted on the local file system.
//!
//! Layout: `<root>/<store name>/<sha256 of "METHOD url">.json`, one JSON file
//! per entry with the body base64-encoded. Every write goes to its own `.tmp`
//! file first and is renamed into place, so a reader never sees half an entry
//! and concurrent writers of one key never share a temp file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{CacheStorage, CacheStore, validate_store_name};
use crate::error::{Error, Result};
use crate::request::{RequestKey, Response};

const ENTRY_EXTENSION: &str = "json";

/// Sequence number making temp file names unique within this process.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// On-disk form of one cache entry.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    method: String,
    url: String,
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
    stored_at: DateTime<Utc>,
}

impl StoredEntry {
    fn new(key: &RequestKey, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        Self {
            method: key.method.as_str().to_string(),
            url: key.url.clone(),
            status: response.status.as_u16(),
            headers,
            body: BASE64.encode(&response.body),
            stored_at: Utc::now(),
        }
    }

    fn key(&self) -> Result<RequestKey> {
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|e| Error::Store(format!("bad method in entry for {}: {e}", self.url)))?;
        Ok(RequestKey {
            method,
            url: self.url.clone(),
        })
    }

    fn into_response(self) -> Result<Response> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| Error::Store(format!("bad status in entry for {}: {e}", self.url)))?;
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
        let body = BASE64
            .decode(self.body.as_bytes())
            .map_err(|e| Error::Store(format!("bad body in entry for {}: {e}", self.url)))?;
        Ok(Response {
            status,
            headers,
            body: body.into(),
        })
    }
}

/// File name for an entry: hex SHA-256 of its request identity.
fn entry_file_name(key: &RequestKey) -> String {
    let digest = Sha256::digest(key.to_string().as_bytes());
    format!("{digest:x}.{ENTRY_EXTENSION}")
}

/// Cache storage rooted at a directory.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    /// Creates a storage rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory holding one subdirectory per store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn store_dir(&self, name: &str) -> Result<PathBuf> {
        validate_store_name(name)?;
        Ok(self.root.join(name))
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    type Store = DiskStore;

    async fn open(&self, name: &str) -> Result<DiskStore> {
        let dir = self.store_dir(name)?;
        tokio::fs::create_dir_all(&dir).await?;
        Ok(DiskStore { dir })
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let dir = self.store_dir(name)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn has(&self, name: &str) -> Result<bool> {
        let dir = self.store_dir(name)?;
        Ok(tokio::fs::metadata(&dir).await.is_ok_and(|m| m.is_dir()))
    }
}

/// Handle to one on-disk store.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    fn entry_path(&self, key: &RequestKey) -> PathBuf {
        self.dir.join(entry_file_name(key))
    }

    async fn read_entry(path: &Path) -> Result<Option<StoredEntry>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheStore for DiskStore {
    async fn keys(&self) -> Result<Vec<RequestKey>> {
        let mut read_dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(read_dir) => read_dir,
            // Store deleted underneath this handle.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        while let Some(entry) = read_dir.next_entry().await? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != ENTRY_EXTENSION) {
                continue;
            }
            if let Some(stored) = Self::read_entry(&path).await? {
                keys.push(stored.key()?);
            }
        }
        keys.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(keys)
    }

    async fn get(&self, key: &RequestKey) -> Result<Option<Response>> {
        match Self::read_entry(&self.entry_path(key)).await? {
            // A renamed or hand-edited file may carry another identity.
            Some(stored) if stored.method == key.method.as_str() && stored.url == key.url => {
                stored.into_response().map(Some)
            }
            _ => Ok(None),
        }
    }

    async fn put(&self, key: &RequestKey, response: &Response) -> Result<()> {
        let path = self.entry_path(key);
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp_path = path.with_extension(format!(
            "{ENTRY_EXTENSION}.{}-{seq}.tmp",
            std::process::id()
        ));
        let bytes = serde_json::to_vec(&StoredEntry::new(key, response))?;

        tokio::fs::write(&tmp_path, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

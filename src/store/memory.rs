//! In-process cache storage.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use super::{CacheStorage, CacheStore, validate_store_name};
use crate::error::Result;
use crate::request::{RequestKey, Response};

type Entries = Arc<Mutex<HashMap<RequestKey, Response>>>;

/// Cache storage held entirely in memory.
///
/// Cloning shares the underlying stores. A handle opened before its store is
/// deleted keeps working on the detached entries, the same way a browser
/// cache handle outlives `caches.delete`.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    stores: Arc<Mutex<HashMap<String, Entries>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of the stores that currently exist, sorted.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        let stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = stores.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    type Store = MemoryStore;

    async fn open(&self, name: &str) -> Result<MemoryStore> {
        validate_store_name(name)?;
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = stores.entry(name.to_string()).or_default();
        Ok(MemoryStore {
            entries: Arc::clone(entries),
        })
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(stores.remove(name).is_some())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        let stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(stores.contains_key(name))
    }
}

/// Handle to one in-memory store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Entries,
}

impl MemoryStore {
    fn with_entries<T>(&self, f: impl FnOnce(&mut HashMap<RequestKey, Response>) -> T) -> T {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut entries)
    }

    /// Number of entries currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.with_entries(|e| e.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn keys(&self) -> Result<Vec<RequestKey>> {
        let mut keys: Vec<_> = self.with_entries(|e| e.keys().cloned().collect());
        keys.sort_by(|a, b| a.url.cmp(&b.url));
        Ok(keys)
    }

    async fn get(&self, key: &RequestKey) -> Result<Option<Response>> {
        Ok(self.with_entries(|e| e.get(key).cloned()))
    }

    async fn put(&self, key: &RequestKey, response: &Response) -> Result<()> {
        self.with_entries(|e| e.insert(key.clone(), response.clone()));
        Ok(())
    }

    async fn delete(&self, key: &RequestKey) -> Result<bool> {
        Ok(self.with_entries(|e| e.remove(key).is_some()))
    }
}

//! Named cache stores, abstracted for testability.
//!
//! A [`CacheStorage`] hands out fresh [`CacheStore`] handles by name. The
//! controller opens a handle per operation and never keeps store contents in
//! memory, so any backend that persists writes atomically survives the host
//! terminating the process between events.

mod disk;
mod memory;

use async_trait::async_trait;

pub use disk::DiskStorage;
pub use memory::{MemoryStorage, MemoryStore};

use crate::error::{Error, Result};
use crate::request::{RequestKey, Response};

/// A single named key → response mapping.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Lists the identities of all stored requests.
    async fn keys(&self) -> Result<Vec<RequestKey>>;

    /// Looks up a stored response.
    async fn get(&self, key: &RequestKey) -> Result<Option<Response>>;

    /// Stores a response, replacing any previous entry for the same key.
    async fn put(&self, key: &RequestKey, response: &Response) -> Result<()>;

    /// Removes an entry. Returns whether it existed.
    async fn delete(&self, key: &RequestKey) -> Result<bool>;
}

/// The collection of named stores available to a controller.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Handle type returned by [`open`](Self::open).
    type Store: CacheStore;

    /// Opens a store, creating it empty if it does not exist.
    async fn open(&self, name: &str) -> Result<Self::Store>;

    /// Deletes a store and all its entries. Returns whether it existed.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Returns true if a store with this name exists.
    async fn has(&self, name: &str) -> Result<bool>;
}

/// Rejects store names that could escape a backend's namespace.
pub(crate) fn validate_store_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(Error::Store(format!("invalid store name {name:?}")))
    }
}

//! Request classification: which requests are managed and which policy serves them.

use reqwest::Method;

use crate::manifest::{ROOT_KEY, ResourceManifest};
use crate::request::{Origin, Request};

/// Marker appended to URLs for cache busting; it never affects the lookup key.
const VERSION_QUERY: &str = "?v=";

/// How an intercepted request is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Not managed; the caller performs normal network handling.
    Passthrough,
    /// The entry document: network first, cache as fallback.
    OnlineFirst { key: String },
    /// Any other managed resource: cache first, populate lazily.
    CacheFirst { key: String },
}

/// Derives the manifest key for a request URL.
///
/// The key is the URL relative to the origin with any `?v=` suffix removed.
/// The origin itself, an empty path, and fragment-routed URLs (`origin/#...`)
/// all map to the root key `"/"`. URLs on other origins have no key.
#[must_use]
pub fn resource_key(origin: &Origin, url: &str) -> Option<String> {
    let path = origin.relative_path(url)?;
    let key = path.split_once(VERSION_QUERY).map_or(path, |(key, _)| key);
    if key.is_empty() || path.starts_with('#') {
        return Some(ROOT_KEY.to_string());
    }
    Some(key.to_string())
}

/// Derives the logical key of a stored cache entry.
///
/// Unlike [`resource_key`] the URL is taken verbatim; only the empty path is
/// normalized to the root key.
#[must_use]
pub fn entry_key(origin: &Origin, url: &str) -> Option<String> {
    let path = origin.relative_path(url)?;
    if path.is_empty() {
        Some(ROOT_KEY.to_string())
    } else {
        Some(path.to_string())
    }
}

/// Chooses the serving policy for a request.
#[must_use]
pub fn route(manifest: &ResourceManifest, origin: &Origin, request: &Request) -> Route {
    if request.method != Method::GET {
        return Route::Passthrough;
    }
    let Some(key) = resource_key(origin, &request.url) else {
        return Route::Passthrough;
    };
    if !manifest.contains(&key) {
        return Route::Passthrough;
    }
    if key == ROOT_KEY {
        Route::OnlineFirst { key }
    } else {
        Route::CacheFirst { key }
    }
}

//! Request, response and origin types shared by the stores, the fetcher and
//! the router.

use std::fmt;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode, Url};

use crate::error::{Error, Result};

/// The scheme + host (+ port) that logical resource keys are relative to.
///
/// Stored without a trailing slash, e.g. `https://app.example.com`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin(String);

impl Origin {
    /// Parses and validates an origin.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the value is not an absolute http(s) URL
    /// or carries a path, query or fragment.
    pub fn parse(value: &str) -> Result<Self> {
        let url = Url::parse(value).map_err(|e| Error::Config(format!("origin {value:?}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "origin {value:?}: unsupported scheme {}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::Config(format!("origin {value:?}: missing host")));
        }
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(Error::Config(format!(
                "origin {value:?}: must not contain a path, query or fragment"
            )));
        }
        // Url::origin drops default ports and lowercases the host.
        Ok(Self(url.origin().ascii_serialization()))
    }

    /// Returns the origin as a string without a trailing slash.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolves a logical resource key to an absolute URL under this origin.
    ///
    /// The root marker `"/"` resolves to the origin's root document.
    #[must_use]
    pub fn resolve(&self, key: &str) -> String {
        format!("{}/{}", self.0, key.trim_start_matches('/'))
    }

    /// Returns the part of `url` after `origin + "/"`, or `None` when the URL
    /// belongs to a different origin. The origin itself yields an empty path.
    #[must_use]
    pub fn relative_path<'a>(&self, url: &'a str) -> Option<&'a str> {
        let rest = url.strip_prefix(self.0.as_str())?;
        if rest.is_empty() {
            return Some("");
        }
        rest.strip_prefix('/')
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a fetch should treat intermediate HTTP caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Normal request semantics.
    #[default]
    Default,
    /// Bypass intermediate caches and force revalidation with the server.
    Reload,
}

/// Identity of a cached request: method + absolute URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub method: Method,
    pub url: String,
}

impl RequestKey {
    /// Creates a key for a `GET` of the given URL.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Request {
    /// Creates a request with an empty body and no headers.
    #[must_use]
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Creates a `GET` request for the given URL.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// Returns the cache identity of this request.
    ///
    /// The fragment never reaches the server, so it is not part of the identity.
    #[must_use]
    pub fn key(&self) -> RequestKey {
        let url = self.url.split_once('#').map_or(self.url.as_str(), |(url, _)| url);
        RequestKey {
            method: self.method.clone(),
            url: url.to_string(),
        }
    }
}

/// A fully buffered response. Cloning is cheap; the body is reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Response {
    /// Creates a response with the given status and body and no headers.
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Creates a `200 OK` response.
    #[must_use]
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    /// Creates a `200 OK` JSON response from a serializable value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value cannot be serialized.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self> {
        let mut response = Self::ok(serde_json::to_vec(value)?);
        response.headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Ok(response)
    }

    /// True for 2xx statuses.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }
}

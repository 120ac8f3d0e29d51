//! Error types for the shell-cache library.

use thiserror::Error;

/// Errors that can occur while installing, activating or serving resources.
#[derive(Error, Debug)]
pub enum Error {
    /// The network request could not be completed.
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP client construction error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A shell resource could not be staged during install.
    #[error("Install failed for {path}: {reason}")]
    Install {
        /// Logical path of the shell resource that failed.
        path: String,
        /// Why the fetch failed.
        reason: String,
    },

    /// A cache store operation failed.
    #[error("Cache store error: {0}")]
    Store(String),

    /// Invalid configuration or deployment data.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The controller was asked to run a phase it cannot run from its current state.
    #[error("Invalid controller state: {0}")]
    InvalidState(String),

    /// I/O error during cache or config file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

impl Error {
    /// Creates a network error from anything displayable.
    pub fn network(reason: impl std::fmt::Display) -> Self {
        Self::Network(reason.to_string())
    }

    /// Returns true if this error came from the network rather than local state.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// A specialized `Result` type for shell-cache operations.
pub type Result<T> = std::result::Result<T, Error>;

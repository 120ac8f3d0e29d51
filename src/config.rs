//! Configuration types for the cache controller and its hosts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Names of the three cache stores a controller owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheNames {
    /// Transient store filled during install.
    pub staging: String,
    /// Durable store consulted on every fetch.
    pub content: String,
    /// Single-entry store holding the last installed manifest.
    pub manifest: String,
}

impl Default for CacheNames {
    fn default() -> Self {
        Self {
            staging: "shell-temp-cache".to_string(),
            content: "shell-app-cache".to_string(),
            manifest: "shell-app-manifest".to_string(),
        }
    }
}

impl CacheNames {
    /// All three names, in staging, content, manifest order.
    #[must_use]
    pub fn all(&self) -> [&str; 3] {
        [
            self.staging.as_str(),
            self.content.as_str(),
            self.manifest.as_str(),
        ]
    }
}

/// Configuration for a cache controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Origin the manifest keys are relative to.
    pub origin: String,
    /// Store names.
    pub cache_names: CacheNames,
    /// Maximum number of network fetches in flight during install and warming.
    pub concurrent_fetches: usize,
    /// User agent sent by the HTTP fetcher.
    pub user_agent: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:8080".to_string(),
            cache_names: CacheNames::default(),
            concurrent_fetches: 8,
            user_agent: format!("shell-cache/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl WorkerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Sets the store names.
    #[must_use]
    pub fn with_cache_names(mut self, names: CacheNames) -> Self {
        self.cache_names = names;
        self
    }

    /// Sets the number of concurrent fetches.
    #[must_use]
    pub const fn with_concurrent_fetches(mut self, concurrent: usize) -> Self {
        self.concurrent_fetches = concurrent;
        self
    }

    /// Checks values that would otherwise fail later in surprising ways.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the concurrency is zero or two stores share a name.
    pub fn validate(&self) -> Result<()> {
        if self.concurrent_fetches == 0 {
            return Err(Error::Config("concurrent_fetches must be at least 1".into()));
        }
        let [staging, content, manifest] = self.cache_names.all();
        if staging == content || staging == manifest || content == manifest {
            return Err(Error::Config("cache store names must be distinct".into()));
        }
        Ok(())
    }
}

/// Path configuration for persisted caches and deployment input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory holding one subdirectory per cache store.
    pub cache_dir: PathBuf,
    /// Deployment file (`.json` or `.toml`) with the manifest and shell list.
    pub deployment: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));

        Self {
            cache_dir: data_dir.join("shell-cache").join("caches"),
            deployment: PathBuf::from("deployment.json"),
        }
    }
}

/// Gateway server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9724,
        }
    }
}

/// Complete application configuration combining worker, path, and server settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub worker: WorkerConfig,
    pub paths: PathConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Creates a new config with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default location of the config file.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("shell-cache")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting worker configuration is invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => {
                log::debug!("Loading config from {}", path.display());
                toml::from_str::<Self>(&contents)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e.into()),
        };
        config.worker.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_worker_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrent_fetches, 8);
        assert_eq!(config.cache_names.content, "shell-app-cache");
        assert!(config.user_agent.starts_with("shell-cache/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn worker_config_builder_pattern() {
        let config = WorkerConfig::new()
            .with_origin("https://app.example.com")
            .with_concurrent_fetches(2);

        assert_eq!(config.origin, "https://app.example.com");
        assert_eq!(config.concurrent_fetches, 2);
    }

    #[test]
    fn validate_rejects_zero_concurrency_and_shared_names() {
        assert!(WorkerConfig::new().with_concurrent_fetches(0).validate().is_err());

        let names = CacheNames {
            staging: "same".into(),
            content: "same".into(),
            manifest: "manifest".into(),
        };
        assert!(WorkerConfig::new().with_cache_names(names).validate().is_err());
    }

    #[test]
    fn default_path_config() {
        let config = PathConfig::default();
        assert!(config.cache_dir.to_string_lossy().contains("shell-cache"));
        assert_eq!(config.deployment, PathBuf::from("deployment.json"));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.server.port, 9724);
    }

    #[test]
    fn load_partial_file_merges_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[worker]\norigin = \"https://app.example.com\"\n\n[worker.cache_names]\ncontent = \"v2-cache\"\n",
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.worker.origin, "https://app.example.com");
        assert_eq!(config.worker.cache_names.content, "v2-cache");
        assert_eq!(config.worker.cache_names.staging, "shell-temp-cache");
        assert_eq!(config.worker.concurrent_fetches, 8);
    }

    #[test]
    fn config_serializes_to_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.worker.origin, config.worker.origin);
        assert_eq!(deserialized.server.host, config.server.host);
    }

    #[test]
    fn load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "worker = 5").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }
}

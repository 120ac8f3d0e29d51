//! Deployment inputs: the resource manifest and the application shell.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Logical key of the application entry document.
pub const ROOT_KEY: &str = "/";

/// Mapping from logical resource path to content fingerprint for one deployment.
///
/// Serializes as a flat JSON object, which is also the format recorded in the
/// manifest store between activations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceManifest(HashMap<String, String>);

impl ResourceManifest {
    /// Creates an empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the fingerprint recorded for `key`, if any.
    #[must_use]
    pub fn fingerprint(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns true if `key` is a managed resource.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterates over all managed resource keys in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses a manifest from its JSON record form.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a JSON object of strings.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serializes the manifest to its JSON record form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ResourceManifest {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Ordered, duplicate-free list of resources needed before the app can render.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct ShellResources(Vec<String>);

impl ShellResources {
    /// Builds a shell set, dropping repeated paths while keeping first-seen order.
    #[must_use]
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        Self(
            paths
                .into_iter()
                .map(Into::into)
                .filter(|p| seen.insert(p.clone()))
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<String>> for ShellResources {
    fn from(paths: Vec<String>) -> Self {
        Self::new(paths)
    }
}

impl From<ShellResources> for Vec<String> {
    fn from(shell: ShellResources) -> Self {
        shell.0
    }
}

/// Everything a deployment supplies: the manifest and the shell subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    /// Logical path → fingerprint.
    pub resources: ResourceManifest,
    /// Shell resources fetched during install.
    #[serde(default)]
    pub core: ShellResources,
}

impl Deployment {
    /// Creates a validated deployment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a shell path is not a manifest key.
    pub fn new(resources: ResourceManifest, core: ShellResources) -> Result<Self> {
        let deployment = Self { resources, core };
        deployment.validate()?;
        Ok(deployment)
    }

    /// Checks that the shell set is a subset of the manifest keys.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first shell path that is not managed.
    pub fn validate(&self) -> Result<()> {
        if let Some(missing) = self.core.iter().find(|p| !self.resources.contains(p)) {
            return Err(Error::Config(format!(
                "shell resource {missing:?} is not listed in the manifest"
            )));
        }
        Ok(())
    }

    /// Loads a deployment from a `.json` or `.toml` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let deployment: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&contents)?,
            Some("json") => serde_json::from_str(&contents)?,
            _ => {
                return Err(Error::Config(format!(
                    "unsupported deployment file {}: expected .json or .toml",
                    path.display()
                )));
            }
        };
        deployment.validate()?;
        log::debug!(
            "Loaded deployment from {}: {} resources, {} shell files",
            path.display(),
            deployment.resources.len(),
            deployment.core.len()
        );
        Ok(deployment)
    }
}

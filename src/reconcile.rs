//! Activation bookkeeping: deciding which cached entries survive an upgrade,
//! and the report an activation produces.

use std::fmt;

use crate::manifest::ResourceManifest;

/// Which reconciliation path an activation took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationMode {
    /// No manifest was recorded: content rebuilt from staging alone.
    Bootstrap,
    /// A previous manifest was recorded: content diffed against it.
    Diff,
}

impl fmt::Display for ActivationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bootstrap => write!(f, "bootstrap"),
            Self::Diff => write!(f, "diff"),
        }
    }
}

/// How an activation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationOutcome {
    /// Reconciliation finished and the manifest was recorded.
    Activated,
    /// Something failed; every store was deleted.
    RolledBack { reason: String },
}

/// Summary of one activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationReport {
    /// `None` if the activation failed before the recorded manifest was read.
    pub mode: Option<ActivationMode>,
    pub outcome: ActivationOutcome,
    /// Logical keys removed from content.
    pub evicted: Vec<String>,
    /// Logical keys kept in content because their fingerprint was unchanged.
    pub preserved: Vec<String>,
    /// Request URLs copied from staging into content.
    pub promoted: Vec<String>,
}

impl ActivationReport {
    pub(crate) const fn new() -> Self {
        Self {
            mode: None,
            outcome: ActivationOutcome::Activated,
            evicted: Vec::new(),
            preserved: Vec::new(),
            promoted: Vec::new(),
        }
    }

    /// True if the activation completed without rolling back.
    #[must_use]
    pub const fn is_activated(&self) -> bool {
        matches!(self.outcome, ActivationOutcome::Activated)
    }
}

/// Decides whether a cached entry must be evicted during a diff.
///
/// An entry goes if its key is not managed by the current manifest, or if
/// its fingerprint differs from the one recorded for the previous deployment.
/// Either condition alone is enough. Entries with no logical key (a foreign
/// origin) are never managed and always go.
#[must_use]
pub fn is_stale(key: Option<&str>, current: &ResourceManifest, previous: &ResourceManifest) -> bool {
    let Some(key) = key else {
        return true;
    };
    match current.fingerprint(key) {
        None => true,
        Some(fingerprint) => previous.fingerprint(key) != Some(fingerprint),
    }
}

//! Cache warming statistics.

use std::time::{Duration, Instant};

/// Result of a manual cache warming pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarmReport {
    /// Manifest keys that were missing from content.
    pub requested: usize,
    /// Keys fetched and stored.
    pub fetched: usize,
    /// Keys that could not be fetched or stored, with the reason.
    pub failed: Vec<(String, String)>,
    /// Total body bytes stored.
    pub total_bytes: u64,
    /// Wall time of the pass.
    pub elapsed: Duration,
}

impl WarmReport {
    /// True if every missing resource was stored.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.fetched == self.requested
    }
}

/// Builder for accumulating [`WarmReport`] values as fetches complete.
pub struct WarmReportBuilder {
    start_time: Instant,
    report: WarmReport,
}

impl Default for WarmReportBuilder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl WarmReportBuilder {
    /// Starts timing a pass over `requested` resources.
    #[must_use]
    pub fn new(requested: usize) -> Self {
        Self {
            start_time: Instant::now(),
            report: WarmReport {
                requested,
                ..WarmReport::default()
            },
        }
    }

    /// Records a stored resource of `bytes` length.
    pub fn add_fetched(&mut self, bytes: u64) {
        self.report.fetched += 1;
        self.report.total_bytes += bytes;
    }

    /// Records a resource that could not be stored.
    pub fn add_failure(&mut self, key: impl Into<String>, reason: impl Into<String>) {
        self.report.failed.push((key.into(), reason.into()));
    }

    /// Finalizes the report.
    #[must_use]
    pub fn build(mut self) -> WarmReport {
        self.report.elapsed = self.start_time.elapsed();
        self.report.failed.sort();
        self.report
    }
}

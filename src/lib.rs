//! shell-cache - An offline cache lifecycle controller for single-page web apps.
//!
//! A deployment ships a manifest mapping every resource path to a content
//! fingerprint, plus the subset of paths (the application shell) needed before
//! the app can render. The [`CacheController`] keeps a durable content store
//! consistent with that manifest across deployments: it stages the shell at
//! install time, evicts only entries whose fingerprint changed when it
//! activates, and then serves requests from the store.
//!
//! Storage and networking sit behind the [`CacheStorage`] and [`Fetcher`]
//! traits, so the same controller runs over [`MemoryStorage`] in tests and
//! [`DiskStorage`] with an [`HttpFetcher`] in the `shell-cache` binary.
//!
//! # Example
//!
//! ```no_run
//! use shell_cache::{CacheController, Deployment, DiskStorage, HttpFetcher, Request, WorkerConfig};
//!
//! # async fn example() -> shell_cache::Result<()> {
//! let config = WorkerConfig::new().with_origin("https://app.example.com");
//! let deployment = Deployment::load("deployment.json".as_ref())?;
//!
//! let controller = CacheController::new(
//!     DiskStorage::new("/var/cache/shell-cache"),
//!     HttpFetcher::new(&config)?,
//!     deployment,
//!     config,
//! )?;
//!
//! controller.install().await?;
//! let report = controller.activate().await?;
//! println!("Promoted {} shell files", report.promoted.len());
//!
//! let outcome = controller
//!     .fetch(&Request::get("https://app.example.com/main.dart.js"))
//!     .await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod controller;
pub mod error;
pub mod fetch;
pub mod format;
pub mod manifest;
pub mod reconcile;
pub mod request;
pub mod router;
pub mod stats;
pub mod store;

#[cfg(feature = "cli")]
pub mod cli;

#[cfg(feature = "server")]
pub mod server;

// Re-export main types for convenience
pub use config::{AppConfig, CacheNames, PathConfig, ServerConfig, WorkerConfig};
pub use controller::{CacheController, Command, ControllerState, FetchOutcome, LifecycleHooks, NoHooks};
pub use error::{Error, Result};
pub use fetch::{Fetcher, HttpFetcher};
pub use manifest::{Deployment, ROOT_KEY, ResourceManifest, ShellResources};
pub use reconcile::{ActivationMode, ActivationOutcome, ActivationReport};
pub use request::{CacheMode, Origin, Request, RequestKey, Response};
pub use router::Route;
pub use stats::{WarmReport, WarmReportBuilder};
pub use store::{CacheStorage, CacheStore, DiskStorage, MemoryStorage, MemoryStore};

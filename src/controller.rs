//! The cache lifecycle controller.
//!
//! One method per trigger: [`install`](CacheController::install) stages the
//! application shell, [`activate`](CacheController::activate) reconciles the
//! content store against the recorded manifest, [`fetch`](CacheController::fetch)
//! serves intercepted requests and [`message`](CacheController::message)
//! handles commands from clients.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use futures::{StreamExt, TryStreamExt, stream};

use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::fetch::Fetcher;
use crate::format::{format_bytes, format_duration};
use crate::manifest::{Deployment, ResourceManifest};
use crate::reconcile::{ActivationMode, ActivationOutcome, ActivationReport, is_stale};
use crate::request::{CacheMode, Origin, Request, RequestKey, Response};
use crate::router::{Route, entry_key, route};
use crate::stats::{WarmReport, WarmReportBuilder};
use crate::store::{CacheStorage, CacheStore};

/// Entry name of the recorded manifest inside the manifest store.
const MANIFEST_ENTRY: &str = "manifest";

/// Lifecycle states of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Constructed, no phase run yet.
    Parsed,
    Installing,
    /// Shell staged, waiting for activation.
    Installed,
    Activating,
    /// Activation finished (or rolled back); requests are served.
    Active,
    /// Install failed. The controller must not be activated.
    Redundant,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parsed => write!(f, "parsed"),
            Self::Installing => write!(f, "installing"),
            Self::Installed => write!(f, "installed"),
            Self::Activating => write!(f, "activating"),
            Self::Active => write!(f, "active"),
            Self::Redundant => write!(f, "redundant"),
        }
    }
}

/// Callbacks into the hosting environment.
///
/// All methods have default no-op implementations for convenience.
pub trait LifecycleHooks: Send + Sync {
    /// Supersede any previously active controller without waiting for its
    /// clients to close.
    fn skip_waiting(&self) {}

    /// Take control of all already-open clients.
    fn claim_clients(&self) {}
}

/// Hooks implementation that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl LifecycleHooks for NoHooks {}

/// A message sent to the controller by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SkipWaiting,
    DownloadOffline,
    /// Anything else; ignored.
    Unknown(String),
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        match text.trim() {
            "skipWaiting" => Self::SkipWaiting,
            "downloadOffline" => Self::DownloadOffline,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// What the controller decided to do with an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Not handled; the caller performs normal network handling.
    Passthrough,
    /// Serve this response.
    Respond(Response),
}

/// Mediates between the network and three named cache stores.
pub struct CacheController<S, F, H = NoHooks> {
    storage: S,
    fetcher: F,
    hooks: H,
    deployment: Deployment,
    origin: Origin,
    config: WorkerConfig,
    state: Mutex<ControllerState>,
    /// Held for the whole of install and activate so the two never interleave.
    lifecycle: tokio::sync::Mutex<()>,
}

impl<S: CacheStorage, F: Fetcher> CacheController<S, F, NoHooks> {
    /// Creates a controller for one deployment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the origin, worker configuration or
    /// deployment is invalid.
    pub fn new(storage: S, fetcher: F, deployment: Deployment, config: WorkerConfig) -> Result<Self> {
        config.validate()?;
        deployment.validate()?;
        let origin = Origin::parse(&config.origin)?;
        Ok(Self {
            storage,
            fetcher,
            hooks: NoHooks,
            deployment,
            origin,
            config,
            state: Mutex::new(ControllerState::Parsed),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }
}

impl<S: CacheStorage, F: Fetcher, H: LifecycleHooks> CacheController<S, F, H> {
    /// Replaces the lifecycle hooks.
    #[must_use]
    pub fn with_hooks<H2: LifecycleHooks>(self, hooks: H2) -> CacheController<S, F, H2> {
        let state = self.state();
        CacheController {
            storage: self.storage,
            fetcher: self.fetcher,
            hooks,
            deployment: self.deployment,
            origin: self.origin,
            config: self.config,
            state: Mutex::new(state),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ControllerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, next: ControllerState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            log::debug!("Controller state {} -> {}", *state, next);
            *state = next;
        }
    }

    #[must_use]
    pub const fn origin(&self) -> &Origin {
        &self.origin
    }

    #[must_use]
    pub const fn deployment(&self) -> &Deployment {
        &self.deployment
    }

    #[must_use]
    pub const fn config(&self) -> &WorkerConfig {
        &self.config
    }

    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    #[must_use]
    pub const fn fetcher(&self) -> &F {
        &self.fetcher
    }

    fn manifest_key(&self) -> RequestKey {
        RequestKey::get(self.origin.resolve(MANIFEST_ENTRY))
    }

    // =========================================================================
    // Install
    // =========================================================================

    /// Fetches every shell resource, bypassing HTTP caches, into the staging store.
    ///
    /// Either all shell resources are staged or none are: on any failure the
    /// staging store is deleted, the controller becomes
    /// [`Redundant`](ControllerState::Redundant) and the error is returned.
    /// The content store is never touched. Returns the number of staged entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Install`] if a shell resource cannot be fetched or
    /// answers with a non-2xx status, or a store error if staging fails.
    pub async fn install(&self) -> Result<usize> {
        let _phase = self.lifecycle.lock().await;
        self.set_state(ControllerState::Installing);
        self.hooks.skip_waiting();

        match self.stage_shell().await {
            Ok(staged) => {
                log::info!(
                    "Installed {staged} shell resources into {}",
                    self.config.cache_names.staging
                );
                self.set_state(ControllerState::Installed);
                Ok(staged)
            }
            Err(e) => {
                log::error!("Install failed: {e}");
                if let Err(cleanup) = self.storage.delete(&self.config.cache_names.staging).await {
                    log::warn!("Failed to discard partial staging store: {cleanup}");
                }
                self.set_state(ControllerState::Redundant);
                Err(e)
            }
        }
    }

    async fn stage_shell(&self) -> Result<usize> {
        let staging_name = &self.config.cache_names.staging;
        // Leftovers from an interrupted install must not leak into this one.
        self.storage.delete(staging_name).await?;

        let fetched: Vec<(RequestKey, Response)> = stream::iter(self.deployment.core.iter().map(str::to_string))
            .map(|path| async move {
                let request = Request::get(self.origin.resolve(&path));
                let install_error = |reason: String| Error::Install {
                    path: path.clone(),
                    reason,
                };
                let response = self
                    .fetcher
                    .fetch(&request, CacheMode::Reload)
                    .await
                    .map_err(|e| install_error(e.to_string()))?;
                if !response.is_ok() {
                    return Err(install_error(format!("unexpected status {}", response.status)));
                }
                Ok::<_, Error>((request.key(), response))
            })
            .buffered(self.config.concurrent_fetches)
            .try_collect()
            .await?;

        let staging = self.storage.open(staging_name).await?;
        for (key, response) in &fetched {
            staging.put(key, response).await?;
        }
        Ok(fetched.len())
    }

    // =========================================================================
    // Activate
    // =========================================================================

    /// Reconciles the content store with the current deployment.
    ///
    /// Without a recorded manifest the content store is rebuilt from staging
    /// alone. With one, entries whose key left the manifest or whose
    /// fingerprint changed are evicted and the rest kept. Staging is then
    /// promoted into content, staging deleted, the manifest recorded and
    /// clients claimed.
    ///
    /// Any failure along the way deletes all three stores and is reported as
    /// [`ActivationOutcome::RolledBack`] rather than returned, so the next
    /// activation starts from a clean bootstrap.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidState`] if the install failed, or if this
    /// controller never installed and no staged shell exists in storage.
    pub async fn activate(&self) -> Result<ActivationReport> {
        let _phase = self.lifecycle.lock().await;
        let staging_name = &self.config.cache_names.staging;
        match self.state() {
            ControllerState::Redundant => {
                return Err(Error::InvalidState(
                    "install failed; a redundant controller cannot activate".into(),
                ));
            }
            // Install may have run in another process; its staged shell is the only proof.
            ControllerState::Parsed => {
                if !self.storage.has(staging_name).await? {
                    return Err(Error::InvalidState(format!(
                        "nothing staged in {staging_name}; run install first"
                    )));
                }
            }
            _ => {}
        }
        self.set_state(ControllerState::Activating);

        let mut report = ActivationReport::new();
        match self.reconcile(&mut report).await {
            Ok(()) => log::info!(
                "Activated ({}): {} promoted, {} kept, {} evicted",
                report.mode.map_or_else(|| "unknown".to_string(), |m| m.to_string()),
                report.promoted.len(),
                report.preserved.len(),
                report.evicted.len()
            ),
            Err(e) => {
                log::error!("Failed to upgrade caches, discarding all cached state: {e}");
                self.rollback().await;
                report.outcome = ActivationOutcome::RolledBack {
                    reason: e.to_string(),
                };
            }
        }
        self.set_state(ControllerState::Active);
        Ok(report)
    }

    async fn reconcile(&self, report: &mut ActivationReport) -> Result<()> {
        let names = &self.config.cache_names;
        let record = self.storage.open(&names.manifest).await?;
        let staging = self.storage.open(&names.staging).await?;

        let content = match record.get(&self.manifest_key()).await? {
            None => {
                report.mode = Some(ActivationMode::Bootstrap);
                log::info!("No recorded manifest, rebuilding {}", names.content);
                self.storage.delete(&names.content).await?;
                self.storage.open(&names.content).await?
            }
            Some(recorded) => {
                report.mode = Some(ActivationMode::Diff);
                let previous = ResourceManifest::from_json(&recorded.body)?;
                let content = self.storage.open(&names.content).await?;
                self.evict_stale(&content, &previous, report).await?;
                content
            }
        };

        // Shell files always win over whatever survived the diff.
        for key in staging.keys().await? {
            if let Some(response) = staging.get(&key).await? {
                content.put(&key, &response).await?;
                report.promoted.push(key.url);
            }
        }

        self.storage.delete(&names.staging).await?;
        let manifest = Response::json(&self.deployment.resources)?;
        record.put(&self.manifest_key(), &manifest).await?;
        self.hooks.claim_clients();
        Ok(())
    }

    async fn evict_stale(
        &self,
        content: &S::Store,
        previous: &ResourceManifest,
        report: &mut ActivationReport,
    ) -> Result<()> {
        for key in content.keys().await? {
            let logical = entry_key(&self.origin, &key.url);
            if is_stale(logical.as_deref(), &self.deployment.resources, previous) {
                content.delete(&key).await?;
                log::debug!("Evicted {key}");
                report.evicted.push(logical.unwrap_or(key.url));
            } else if let Some(logical) = logical {
                report.preserved.push(logical);
            }
        }
        Ok(())
    }

    async fn rollback(&self) {
        for name in self.config.cache_names.all() {
            if let Err(e) = self.storage.delete(name).await {
                log::error!("Failed to delete {name} during rollback: {e}");
            }
        }
    }

    /// Reads the manifest recorded by the last successful activation.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or the record is corrupt.
    pub async fn recorded_manifest(&self) -> Result<Option<ResourceManifest>> {
        if !self.storage.has(&self.config.cache_names.manifest).await? {
            return Ok(None);
        }
        let record = self.storage.open(&self.config.cache_names.manifest).await?;
        match record.get(&self.manifest_key()).await? {
            Some(recorded) => Ok(Some(ResourceManifest::from_json(&recorded.body)?)),
            None => Ok(None),
        }
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    /// Serves an intercepted request.
    ///
    /// Non-`GET` requests and requests for resources outside the manifest are
    /// passed through without touching any store. The entry document is
    /// served online-first; everything else cache-first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] when the network fails and no cached copy
    /// exists, or a store error if the content store cannot be read.
    pub async fn fetch(&self, request: &Request) -> Result<FetchOutcome> {
        match route(&self.deployment.resources, &self.origin, request) {
            Route::Passthrough => Ok(FetchOutcome::Passthrough),
            Route::OnlineFirst { .. } => self.online_first(request).await.map(FetchOutcome::Respond),
            Route::CacheFirst { .. } => self.cache_first(request).await.map(FetchOutcome::Respond),
        }
    }

    async fn cache_first(&self, request: &Request) -> Result<Response> {
        let content = self.storage.open(&self.config.cache_names.content).await?;
        let key = request.key();
        if let Some(cached) = content.get(&key).await? {
            log::debug!("Cache hit {key}");
            return Ok(cached);
        }

        let response = self.fetcher.fetch(request, CacheMode::Default).await?;
        if response.is_ok() {
            self.store_copy(&key, &response).await;
        }
        Ok(response)
    }

    async fn online_first(&self, request: &Request) -> Result<Response> {
        let key = request.key();
        match self.fetcher.fetch(request, CacheMode::Default).await {
            Ok(response) => {
                self.store_copy(&key, &response).await;
                Ok(response)
            }
            Err(network_error) => {
                log::warn!("{key} unreachable, falling back to cache: {network_error}");
                match self.cached(&key).await {
                    Ok(Some(cached)) => Ok(cached),
                    Ok(None) => Err(network_error),
                    Err(e) => {
                        log::warn!("Cache fallback for {key} failed: {e}");
                        Err(network_error)
                    }
                }
            }
        }
    }

    async fn cached(&self, key: &RequestKey) -> Result<Option<Response>> {
        let content = self.storage.open(&self.config.cache_names.content).await?;
        content.get(key).await
    }

    /// Stores a copy of a network response. Failures only cost a future cache hit.
    async fn store_copy(&self, key: &RequestKey, response: &Response) {
        let result = async {
            let content = self.storage.open(&self.config.cache_names.content).await?;
            content.put(key, response).await
        }
        .await;
        if let Err(e) = result {
            log::warn!("Failed to cache {key}: {e}");
        }
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Handles a client command. Returns the warming report for
    /// [`Command::DownloadOffline`].
    ///
    /// # Errors
    ///
    /// Returns an error if warming cannot read the content store.
    pub async fn message(&self, command: &Command) -> Result<Option<WarmReport>> {
        match command {
            Command::SkipWaiting => {
                log::debug!("skipWaiting requested");
                self.hooks.skip_waiting();
                Ok(None)
            }
            Command::DownloadOffline => self.download_offline().await.map(Some),
            Command::Unknown(other) => {
                log::debug!("Ignoring unknown message {other:?}");
                Ok(None)
            }
        }
    }

    /// Fetches every managed resource not yet in the content store.
    ///
    /// Best effort: individual failures are logged and listed in the report
    /// without stopping the rest.
    ///
    /// # Errors
    ///
    /// Returns an error only if the content store cannot be opened or listed.
    pub async fn download_offline(&self) -> Result<WarmReport> {
        let content = self.storage.open(&self.config.cache_names.content).await?;
        let present: HashSet<String> = content
            .keys()
            .await?
            .iter()
            .filter_map(|key| entry_key(&self.origin, &key.url))
            .collect();

        let mut missing: Vec<String> = self
            .deployment
            .resources
            .keys()
            .filter(|key| !present.contains(*key))
            .map(str::to_string)
            .collect();
        missing.sort_unstable();
        log::info!("Warming {} resources for offline use", missing.len());

        let mut builder = WarmReportBuilder::new(missing.len());
        let content = &content;
        let results: Vec<_> = stream::iter(missing)
            .map(|key| async move {
                let result = self.warm_one(content, &key).await;
                (key, result)
            })
            .buffer_unordered(self.config.concurrent_fetches)
            .collect()
            .await;

        for (key, result) in results {
            match result {
                Ok(bytes) => builder.add_fetched(bytes),
                Err(e) => {
                    log::error!("Failed to cache {key} for offline use: {e}");
                    builder.add_failure(key, e.to_string());
                }
            }
        }

        let report = builder.build();
        log::info!(
            "Offline warming stored {}/{} resources ({}) in {}",
            report.fetched,
            report.requested,
            format_bytes(report.total_bytes),
            format_duration(report.elapsed)
        );
        Ok(report)
    }

    async fn warm_one(&self, content: &S::Store, key: &str) -> Result<u64> {
        let request = Request::get(self.origin.resolve(key));
        let response = self.fetcher.fetch(&request, CacheMode::Default).await?;
        if !response.is_ok() {
            return Err(Error::network(format!("unexpected status {}", response.status)));
        }
        content.put(&request.key(), &response).await?;
        Ok(response.body.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ShellResources;
    use crate::store::{MemoryStorage, MemoryStore};
    use async_trait::async_trait;
    use reqwest::{Method, StatusCode};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    const ORIGIN: &str = "https://app.test";

    fn url(path: &str) -> String {
        format!("{ORIGIN}/{path}")
    }

    // =========================================================================
    // Mocks
    // =========================================================================

    /// Serves canned bodies by URL; unknown URLs are 404s.
    #[derive(Default)]
    struct MockFetcher {
        bodies: Mutex<HashMap<String, String>>,
        offline: AtomicBool,
        calls: Mutex<Vec<(String, CacheMode)>>,
    }

    impl MockFetcher {
        fn with(entries: &[(&str, &str)]) -> Arc<Self> {
            let fetcher = Self::default();
            for (path, body) in entries {
                fetcher.serve(path, body);
            }
            Arc::new(fetcher)
        }

        fn serve(&self, path: &str, body: &str) {
            self.bodies.lock().unwrap().insert(url(path), body.to_string());
        }

        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }

        fn calls(&self) -> Vec<(String, CacheMode)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetcher for Arc<MockFetcher> {
        async fn fetch(&self, request: &Request, mode: CacheMode) -> Result<Response> {
            self.calls.lock().unwrap().push((request.url.clone(), mode));
            if self.offline.load(Ordering::SeqCst) {
                return Err(Error::network("offline"));
            }
            Ok(match self.bodies.lock().unwrap().get(&request.url) {
                Some(body) => Response::ok(body.clone()),
                None => Response::new(StatusCode::NOT_FOUND, "missing"),
            })
        }
    }

    #[derive(Default)]
    struct CountingHooks {
        skip_waiting: AtomicUsize,
        claim_clients: AtomicUsize,
    }

    impl LifecycleHooks for Arc<CountingHooks> {
        fn skip_waiting(&self) {
            self.skip_waiting.fetch_add(1, Ordering::SeqCst);
        }

        fn claim_clients(&self) {
            self.claim_clients.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Memory storage whose entry deletes fail in one named store.
    #[derive(Clone)]
    struct FailingStorage {
        inner: MemoryStorage,
        fail_deletes_in: String,
    }

    struct FailingStore {
        inner: MemoryStore,
        fail_deletes: bool,
    }

    #[async_trait]
    impl CacheStore for FailingStore {
        async fn keys(&self) -> Result<Vec<RequestKey>> {
            self.inner.keys().await
        }

        async fn get(&self, key: &RequestKey) -> Result<Option<Response>> {
            self.inner.get(key).await
        }

        async fn put(&self, key: &RequestKey, response: &Response) -> Result<()> {
            self.inner.put(key, response).await
        }

        async fn delete(&self, key: &RequestKey) -> Result<bool> {
            if self.fail_deletes {
                return Err(Error::Store("injected delete failure".into()));
            }
            self.inner.delete(key).await
        }
    }

    #[async_trait]
    impl CacheStorage for FailingStorage {
        type Store = FailingStore;

        async fn open(&self, name: &str) -> Result<FailingStore> {
            Ok(FailingStore {
                inner: self.inner.open(name).await?,
                fail_deletes: name == self.fail_deletes_in,
            })
        }

        async fn delete(&self, name: &str) -> Result<bool> {
            self.inner.delete(name).await
        }

        async fn has(&self, name: &str) -> Result<bool> {
            self.inner.has(name).await
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn deployment(resources: &[(&str, &str)], core: &[&str]) -> Deployment {
        Deployment::new(
            resources.iter().copied().collect(),
            ShellResources::new(core.iter().copied()),
        )
        .unwrap()
    }

    fn config() -> WorkerConfig {
        WorkerConfig::new().with_origin(ORIGIN)
    }

    fn controller<S: CacheStorage>(
        storage: S,
        fetcher: &Arc<MockFetcher>,
        deployment: Deployment,
    ) -> CacheController<S, Arc<MockFetcher>> {
        CacheController::new(storage, Arc::clone(fetcher), deployment, config()).unwrap()
    }

    async fn content(storage: &MemoryStorage) -> MemoryStore {
        storage.open("shell-app-cache").await.unwrap()
    }

    async fn cached_body(storage: &MemoryStorage, path: &str) -> Option<String> {
        content(storage)
            .await
            .get(&RequestKey::get(url(path)))
            .await
            .unwrap()
            .map(|r| String::from_utf8(r.body.to_vec()).unwrap())
    }

    async fn seed(storage: &MemoryStorage, store: &str, path: &str, body: &str) {
        storage
            .open(store)
            .await
            .unwrap()
            .put(&RequestKey::get(url(path)), &Response::ok(body.to_string()))
            .await
            .unwrap();
    }

    async fn record_manifest(storage: &MemoryStorage, entries: &[(&str, &str)]) {
        let manifest: ResourceManifest = entries.iter().copied().collect();
        storage
            .open("shell-app-manifest")
            .await
            .unwrap()
            .put(
                &RequestKey::get(url(MANIFEST_ENTRY)),
                &Response::json(&manifest).unwrap(),
            )
            .await
            .unwrap();
    }

    async fn content_urls(storage: &MemoryStorage) -> Vec<String> {
        content(storage)
            .await
            .keys()
            .await
            .unwrap()
            .into_iter()
            .map(|k| k.url)
            .collect()
    }

    // =========================================================================
    // Install
    // =========================================================================

    #[tokio::test]
    async fn install_stages_shell_with_reload() {
        let storage = MemoryStorage::new();
        let fetcher = MockFetcher::with(&[("main.dart.js", "main"), ("index.html", "index")]);
        let c = controller(
            storage.clone(),
            &fetcher,
            deployment(&[("main.dart.js", "h1"), ("index.html", "h2")], &["main.dart.js", "index.html"]),
        );

        assert_eq!(c.install().await.unwrap(), 2);
        assert_eq!(c.state(), ControllerState::Installed);

        let staging = storage.open("shell-temp-cache").await.unwrap();
        assert_eq!(staging.len(), 2);
        assert!(!storage.has("shell-app-cache").await.unwrap());
        assert!(fetcher.calls().iter().all(|(_, mode)| *mode == CacheMode::Reload));
    }

    #[tokio::test]
    async fn install_failure_leaves_no_staging() {
        let storage = MemoryStorage::new();
        // index.html is not served, so it 404s.
        let fetcher = MockFetcher::with(&[("main.dart.js", "main")]);
        let c = controller(
            storage.clone(),
            &fetcher,
            deployment(&[("main.dart.js", "h1"), ("index.html", "h2")], &["main.dart.js", "index.html"]),
        );

        let err = c.install().await.unwrap_err();
        assert!(matches!(err, Error::Install { ref path, .. } if path == "index.html"));
        assert!(!storage.has("shell-temp-cache").await.unwrap());
        assert_eq!(c.state(), ControllerState::Redundant);
        assert!(matches!(c.activate().await, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn install_network_failure_is_install_error() {
        let storage = MemoryStorage::new();
        let fetcher = MockFetcher::with(&[("main.dart.js", "main")]);
        fetcher.set_offline(true);
        let c = controller(storage.clone(), &fetcher, deployment(&[("main.dart.js", "h1")], &["main.dart.js"]));

        assert!(matches!(c.install().await, Err(Error::Install { .. })));
        assert!(storage.store_names().is_empty());
    }

    #[tokio::test]
    async fn install_and_activate_call_hooks() {
        let hooks = Arc::new(CountingHooks::default());
        let fetcher = MockFetcher::with(&[("main.dart.js", "main")]);
        let c = controller(MemoryStorage::new(), &fetcher, deployment(&[("main.dart.js", "h1")], &["main.dart.js"]))
            .with_hooks(Arc::clone(&hooks));

        c.install().await.unwrap();
        assert_eq!(hooks.skip_waiting.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.claim_clients.load(Ordering::SeqCst), 0);

        c.activate().await.unwrap();
        assert_eq!(hooks.claim_clients.load(Ordering::SeqCst), 1);
        assert_eq!(c.state(), ControllerState::Active);
    }

    // =========================================================================
    // Activate
    // =========================================================================

    #[tokio::test]
    async fn bootstrap_replaces_content_with_staging() {
        let storage = MemoryStorage::new();
        seed(&storage, "shell-app-cache", "old.js", "old").await;
        seed(&storage, "shell-app-cache", "main.dart.js", "stale main").await;
        let fetcher = MockFetcher::with(&[("main.dart.js", "main")]);
        let c = controller(
            storage.clone(),
            &fetcher,
            deployment(&[("main.dart.js", "h1"), ("old.js", "h9")], &["main.dart.js"]),
        );

        c.install().await.unwrap();
        let report = c.activate().await.unwrap();

        assert!(report.is_activated());
        assert_eq!(report.mode, Some(ActivationMode::Bootstrap));
        assert_eq!(content_urls(&storage).await, vec![url("main.dart.js")]);
        assert_eq!(cached_body(&storage, "main.dart.js").await.as_deref(), Some("main"));
        assert!(!storage.has("shell-temp-cache").await.unwrap());
        assert_eq!(
            c.recorded_manifest().await.unwrap(),
            Some(c.deployment().resources.clone())
        );
    }

    #[tokio::test]
    async fn diff_evicts_changed_fingerprint_not_in_shell() {
        let storage = MemoryStorage::new();
        record_manifest(&storage, &[("a.js", "h1"), ("b.js", "h2")]).await;
        seed(&storage, "shell-app-cache", "a.js", "a").await;
        seed(&storage, "shell-app-cache", "b.js", "b-old").await;
        let fetcher = MockFetcher::with(&[("a.js", "a")]);
        let c = controller(
            storage.clone(),
            &fetcher,
            deployment(&[("a.js", "h1"), ("b.js", "h3")], &["a.js"]),
        );

        c.install().await.unwrap();
        let report = c.activate().await.unwrap();

        assert_eq!(report.mode, Some(ActivationMode::Diff));
        assert_eq!(report.evicted, vec!["b.js".to_string()]);
        assert_eq!(report.preserved, vec!["a.js".to_string()]);
        assert_eq!(cached_body(&storage, "b.js").await, None);
        assert_eq!(cached_body(&storage, "a.js").await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn diff_refreshes_changed_shell_file_from_staging() {
        let storage = MemoryStorage::new();
        record_manifest(&storage, &[("b.js", "h2")]).await;
        seed(&storage, "shell-app-cache", "b.js", "b-old").await;
        let fetcher = MockFetcher::with(&[("b.js", "b-new")]);
        let c = controller(storage.clone(), &fetcher, deployment(&[("b.js", "h3")], &["b.js"]));

        c.install().await.unwrap();
        c.activate().await.unwrap();

        assert_eq!(cached_body(&storage, "b.js").await.as_deref(), Some("b-new"));
    }

    #[tokio::test]
    async fn diff_evicts_keys_dropped_from_manifest() {
        let storage = MemoryStorage::new();
        record_manifest(&storage, &[("a.js", "h1"), ("c.js", "h1")]).await;
        seed(&storage, "shell-app-cache", "a.js", "a").await;
        seed(&storage, "shell-app-cache", "c.js", "c").await;
        let fetcher = MockFetcher::with(&[]);
        let c = controller(storage.clone(), &fetcher, deployment(&[("a.js", "h1")], &[]));

        c.install().await.unwrap();
        let report = c.activate().await.unwrap();

        assert_eq!(report.evicted, vec!["c.js".to_string()]);
        assert_eq!(content_urls(&storage).await, vec![url("a.js")]);
    }

    #[tokio::test]
    async fn diff_keeps_unchanged_root_document() {
        let storage = MemoryStorage::new();
        record_manifest(&storage, &[("/", "h0")]).await;
        storage
            .open("shell-app-cache")
            .await
            .unwrap()
            .put(&RequestKey::get(format!("{ORIGIN}/")), &Response::ok("<html>"))
            .await
            .unwrap();
        let fetcher = MockFetcher::with(&[]);
        let c = controller(storage.clone(), &fetcher, deployment(&[("/", "h0")], &[]));

        c.install().await.unwrap();
        let report = c.activate().await.unwrap();
        assert_eq!(report.preserved, vec!["/".to_string()]);
        assert!(report.evicted.is_empty());
    }

    #[tokio::test]
    async fn fresh_controller_refuses_to_activate_after_failed_install() {
        let storage = MemoryStorage::new();
        let fetcher = MockFetcher::with(&[("a.js", "a")]);
        let v1 = controller(storage.clone(), &fetcher, deployment(&[("a.js", "h1")], &["a.js"]));
        v1.install().await.unwrap();
        v1.activate().await.unwrap();

        // b.js is not served, so the next install fails.
        let next = deployment(&[("a.js", "h1"), ("b.js", "h2")], &["a.js", "b.js"]);
        let v2 = controller(storage.clone(), &fetcher, next.clone());
        assert!(v2.install().await.is_err());

        let v3 = controller(storage.clone(), &fetcher, next);
        assert!(matches!(v3.activate().await, Err(Error::InvalidState(_))));
        assert_eq!(v3.state(), ControllerState::Parsed);
        assert_eq!(content_urls(&storage).await, vec![url("a.js")]);
        assert_eq!(
            v3.recorded_manifest().await.unwrap(),
            Some(v1.deployment().resources.clone())
        );
    }

    #[tokio::test]
    async fn fresh_controller_activates_shell_staged_by_another() {
        let storage = MemoryStorage::new();
        let fetcher = MockFetcher::with(&[("a.js", "a")]);
        let d = deployment(&[("a.js", "h1")], &["a.js"]);
        controller(storage.clone(), &fetcher, d.clone()).install().await.unwrap();

        let report = controller(storage.clone(), &fetcher, d).activate().await.unwrap();
        assert!(report.is_activated());
        assert_eq!(cached_body(&storage, "a.js").await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn activation_is_idempotent() {
        let storage = MemoryStorage::new();
        let fetcher = MockFetcher::with(&[("a.js", "a"), ("b.js", "b")]);
        let c = controller(
            storage.clone(),
            &fetcher,
            deployment(&[("a.js", "h1"), ("b.js", "h2"), ("c.js", "h3")], &["a.js"]),
        );
        c.install().await.unwrap();
        c.activate().await.unwrap();
        // Lazily populated, not part of the shell.
        c.fetch(&Request::get(url("b.js"))).await.unwrap();

        let before = content(&storage).await;
        let mut snapshot = Vec::new();
        for key in before.keys().await.unwrap() {
            snapshot.push((key.clone(), before.get(&key).await.unwrap()));
        }

        let report = c.activate().await.unwrap();
        assert!(report.is_activated());
        assert!(report.evicted.is_empty());

        let after = content(&storage).await;
        let mut second = Vec::new();
        for key in after.keys().await.unwrap() {
            second.push((key.clone(), after.get(&key).await.unwrap()));
        }
        assert_eq!(snapshot, second);
    }

    #[tokio::test]
    async fn failure_during_diff_rolls_back_everything() {
        let inner = MemoryStorage::new();
        record_manifest(&inner, &[("a.js", "h1")]).await;
        seed(&inner, "shell-app-cache", "a.js", "a").await;
        let storage = FailingStorage {
            inner: inner.clone(),
            fail_deletes_in: "shell-app-cache".into(),
        };
        let fetcher = MockFetcher::with(&[("b.js", "b")]);
        // a.js changes fingerprint, so the diff must delete it and hits the fault.
        let c = controller(storage, &fetcher, deployment(&[("a.js", "h2"), ("b.js", "h1")], &["b.js"]));

        c.install().await.unwrap();
        let report = c.activate().await.unwrap();

        assert!(matches!(report.outcome, ActivationOutcome::RolledBack { .. }));
        assert!(inner.store_names().is_empty());
        assert_eq!(c.state(), ControllerState::Active);
    }

    #[tokio::test]
    async fn corrupt_manifest_record_rolls_back_then_bootstraps() {
        let storage = MemoryStorage::new();
        storage
            .open("shell-app-manifest")
            .await
            .unwrap()
            .put(&RequestKey::get(url(MANIFEST_ENTRY)), &Response::ok("{not json"))
            .await
            .unwrap();
        let fetcher = MockFetcher::with(&[("a.js", "a")]);
        let c = controller(storage.clone(), &fetcher, deployment(&[("a.js", "h1")], &["a.js"]));

        c.install().await.unwrap();
        let report = c.activate().await.unwrap();
        assert!(!report.is_activated());
        assert!(storage.store_names().is_empty());

        c.install().await.unwrap();
        let report = c.activate().await.unwrap();
        assert!(report.is_activated());
        assert_eq!(report.mode, Some(ActivationMode::Bootstrap));
    }

    // =========================================================================
    // Fetch
    // =========================================================================

    #[tokio::test]
    async fn unmanaged_get_never_touches_content() {
        let storage = MemoryStorage::new();
        let fetcher = MockFetcher::with(&[]);
        let c = controller(storage.clone(), &fetcher, deployment(&[("a.js", "h1")], &[]));

        let outcome = c.fetch(&Request::get(url("api/user"))).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Passthrough);
        assert!(storage.store_names().is_empty());
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test]
    async fn non_get_passes_through() {
        let storage = MemoryStorage::new();
        let fetcher = MockFetcher::with(&[("a.js", "a")]);
        let c = controller(storage.clone(), &fetcher, deployment(&[("a.js", "h1")], &[]));

        let outcome = c.fetch(&Request::new(Method::POST, url("a.js"))).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Passthrough);
        assert!(storage.store_names().is_empty());
    }

    #[tokio::test]
    async fn cache_first_populates_lazily_then_serves_offline() {
        let storage = MemoryStorage::new();
        let fetcher = MockFetcher::with(&[("a.js", "a")]);
        let c = controller(storage.clone(), &fetcher, deployment(&[("a.js", "h1")], &[]));
        let request = Request::get(url("a.js"));

        let first = c.fetch(&request).await.unwrap();
        assert_eq!(first, FetchOutcome::Respond(Response::ok("a")));
        assert_eq!(cached_body(&storage, "a.js").await.as_deref(), Some("a"));

        fetcher.set_offline(true);
        let second = c.fetch(&request).await.unwrap();
        assert_eq!(second, FetchOutcome::Respond(Response::ok("a")));
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn cache_first_does_not_store_error_statuses() {
        let storage = MemoryStorage::new();
        let fetcher = MockFetcher::with(&[]);
        let c = controller(storage.clone(), &fetcher, deployment(&[("a.js", "h1")], &[]));

        let outcome = c.fetch(&Request::get(url("a.js"))).await.unwrap();
        let FetchOutcome::Respond(response) = outcome else {
            panic!("expected a response");
        };
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert!(content(&storage).await.is_empty());
    }

    #[tokio::test]
    async fn cache_first_miss_while_offline_is_network_error() {
        let fetcher = MockFetcher::with(&[("a.js", "a")]);
        fetcher.set_offline(true);
        let c = controller(MemoryStorage::new(), &fetcher, deployment(&[("a.js", "h1")], &[]));

        let err = c.fetch(&Request::get(url("a.js"))).await.unwrap_err();
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn versioned_url_is_managed() {
        let storage = MemoryStorage::new();
        let fetcher = MockFetcher::with(&[]);
        fetcher.bodies.lock().unwrap().insert(url("main.dart.js?v=5"), "main".into());
        let c = controller(storage.clone(), &fetcher, deployment(&[("main.dart.js", "h1")], &[]));

        let outcome = c.fetch(&Request::get(url("main.dart.js?v=5"))).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Respond(Response::ok("main")));
    }

    #[tokio::test]
    async fn entry_document_is_online_first_with_cache_fallback() {
        let storage = MemoryStorage::new();
        let fetcher = MockFetcher::with(&[("", "<html>v1")]);
        let c = controller(storage.clone(), &fetcher, deployment(&[("/", "h0")], &[]));
        let request = Request::get(format!("{ORIGIN}/"));

        let online = c.fetch(&request).await.unwrap();
        assert_eq!(online, FetchOutcome::Respond(Response::ok("<html>v1")));

        fetcher.serve("", "<html>v2");
        let refreshed = c.fetch(&request).await.unwrap();
        assert_eq!(refreshed, FetchOutcome::Respond(Response::ok("<html>v2")));

        fetcher.set_offline(true);
        let offline = c.fetch(&request).await.unwrap();
        assert_eq!(offline, FetchOutcome::Respond(Response::ok("<html>v2")));
        assert_eq!(fetcher.calls().len(), 3);
    }

    #[tokio::test]
    async fn fragment_route_falls_back_to_staged_entry_document() {
        let storage = MemoryStorage::new();
        let fetcher = MockFetcher::with(&[("", "<html>")]);
        let c = controller(storage.clone(), &fetcher, deployment(&[("/", "h0")], &["/"]));
        c.install().await.unwrap();
        c.activate().await.unwrap();

        fetcher.set_offline(true);
        let outcome = c.fetch(&Request::get(format!("{ORIGIN}/#/home"))).await.unwrap();
        assert_eq!(outcome, FetchOutcome::Respond(Response::ok("<html>")));
    }

    #[tokio::test]
    async fn entry_document_caches_any_network_answer() {
        let storage = MemoryStorage::new();
        // The root is not served, so the origin answers 404.
        let fetcher = MockFetcher::with(&[]);
        let c = controller(storage.clone(), &fetcher, deployment(&[("/", "h0")], &[]));
        let request = Request::get(format!("{ORIGIN}/"));

        let FetchOutcome::Respond(online) = c.fetch(&request).await.unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(online.status, StatusCode::NOT_FOUND);

        fetcher.set_offline(true);
        let FetchOutcome::Respond(offline) = c.fetch(&request).await.unwrap() else {
            panic!("expected a response");
        };
        assert_eq!(offline.status, StatusCode::NOT_FOUND);
        assert_eq!(&offline.body[..], b"missing");
    }

    #[tokio::test]
    async fn entry_document_offline_without_cache_is_original_error() {
        let fetcher = MockFetcher::with(&[]);
        fetcher.set_offline(true);
        let c = controller(MemoryStorage::new(), &fetcher, deployment(&[("/", "h0")], &[]));

        let err = c.fetch(&Request::get(format!("{ORIGIN}/#/route"))).await.unwrap_err();
        assert_eq!(err.to_string(), "Network error: offline");
    }

    // =========================================================================
    // Messages
    // =========================================================================

    #[test]
    fn command_parsing() {
        assert_eq!(Command::from("skipWaiting"), Command::SkipWaiting);
        assert_eq!(Command::from("downloadOffline\n"), Command::DownloadOffline);
        assert_eq!(Command::from("reload"), Command::Unknown("reload".into()));
    }

    #[tokio::test]
    async fn skip_waiting_message_calls_hook() {
        let hooks = Arc::new(CountingHooks::default());
        let fetcher = MockFetcher::with(&[]);
        let c = controller(MemoryStorage::new(), &fetcher, deployment(&[], &[])).with_hooks(Arc::clone(&hooks));

        assert_eq!(c.message(&Command::SkipWaiting).await.unwrap(), None);
        assert_eq!(c.message(&Command::from("bogus")).await.unwrap(), None);
        assert_eq!(hooks.skip_waiting.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn download_offline_fetches_only_missing() {
        let storage = MemoryStorage::new();
        seed(&storage, "shell-app-cache", "a.js", "a").await;
        let fetcher = MockFetcher::with(&[("a.js", "a"), ("b.js", "bb"), ("", "<html>")]);
        let c = controller(
            storage.clone(),
            &fetcher,
            deployment(&[("a.js", "h1"), ("b.js", "h2"), ("/", "h0"), ("gone.js", "h3")], &[]),
        );

        let report = c.message(&Command::DownloadOffline).await.unwrap().unwrap();

        assert_eq!(report.requested, 3);
        assert_eq!(report.fetched, 2);
        assert_eq!(report.total_bytes, 8);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "gone.js");
        assert_eq!(cached_body(&storage, "b.js").await.as_deref(), Some("bb"));
        assert_eq!(cached_body(&storage, "").await.as_deref(), Some("<html>"));
        let fetched: Vec<_> = fetcher.calls().into_iter().map(|(u, _)| u).collect();
        assert!(!fetched.contains(&url("a.js")));
    }
}

//! CLI mode for shell-cache: drive the controller lifecycle from a terminal.

mod progress;

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use console::style;

use crate::format::format_bytes;
use crate::router::entry_key;
use crate::{
    AppConfig, CacheController, CacheStorage, CacheStore, Command, Deployment, DiskStorage,
    FetchOutcome, Fetcher, HttpFetcher, Request, Result,
};

use progress::{
    StoreLine, make_spinner, print_activation, print_install, print_status,
    print_warm_summary,
};

type DiskController = CacheController<DiskStorage, HttpFetcher>;

#[derive(Parser, Debug)]
#[command(
    name = "shell-cache",
    version,
    about = "Offline cache lifecycle controller for single-page web apps"
)]
pub struct Cli {
    /// Config file (TOML). Defaults to the user config directory.
    #[arg(long, global = true, env = "SHELL_CACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Deployment file (.json or .toml) with the manifest and shell list
    #[arg(long, global = true, env = "SHELL_CACHE_DEPLOYMENT")]
    pub deployment: Option<PathBuf>,

    /// Directory holding the cache stores
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Origin the manifest keys are relative to
    #[arg(long, global = true)]
    pub origin: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub cmd: CliCommand,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Stage the application shell into the staging store
    Install,
    /// Reconcile the content store with the deployment (needs a staged install)
    Activate,
    /// Install, then activate
    Update,
    /// Serve one GET through the cache; the body goes to stdout
    Fetch {
        url: String,
        /// Write the body to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Fetch every managed resource that is not cached yet
    Warm,
    /// Send a client message (skipWaiting, downloadOffline)
    Message { command: String },
    /// Show the cache stores and the recorded manifest
    Status,
    /// Install, activate and run the caching gateway
    #[cfg(feature = "server")]
    Serve {
        /// Bind address
        #[arg(long)]
        host: Option<String>,
        /// Bind port
        #[arg(long)]
        port: Option<u16>,
    },
}

impl Cli {
    /// Loads the config file and applies command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but is invalid.
    pub fn load_config(&self) -> Result<AppConfig> {
        let path = self.config.clone().unwrap_or_else(AppConfig::default_path);
        let mut config = AppConfig::load(&path)?;

        if let Some(deployment) = &self.deployment {
            config.paths.deployment.clone_from(deployment);
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.paths.cache_dir.clone_from(cache_dir);
        }
        if let Some(origin) = &self.origin {
            config.worker.origin.clone_from(origin);
        }
        #[cfg(feature = "server")]
        if let CliCommand::Serve { host, port } = &self.cmd {
            if let Some(host) = host {
                config.server.host.clone_from(host);
            }
            if let Some(port) = port {
                config.server.port = *port;
            }
        }
        Ok(config)
    }
}

fn build_controller(config: &AppConfig) -> Result<DiskController> {
    let deployment = Deployment::load(&config.paths.deployment)?;
    let fetcher = HttpFetcher::new(&config.worker)?;
    let storage = DiskStorage::new(&config.paths.cache_dir);
    log::debug!("Cache stores live in {}", config.paths.cache_dir.display());
    CacheController::new(storage, fetcher, deployment, config.worker.clone())
}

/// Runs the parsed command.
///
/// # Errors
///
/// Returns an error if the configuration, deployment or the command itself fails.
pub async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;
    let controller = build_controller(&config)?;

    match cli.cmd {
        CliCommand::Install => install(&controller).await,
        CliCommand::Activate => activate(&controller).await,
        CliCommand::Update => {
            install(&controller).await?;
            activate(&controller).await
        }
        CliCommand::Fetch { url, output } => fetch(&controller, &url, output).await,
        CliCommand::Warm => warm(&controller).await,
        CliCommand::Message { command } => message(&controller, &command).await,
        CliCommand::Status => status(&controller).await,
        #[cfg(feature = "server")]
        CliCommand::Serve { .. } => {
            crate::server::run_standalone(std::sync::Arc::new(controller), &config.server).await
        }
    }
}

async fn install(controller: &DiskController) -> Result<()> {
    let spinner = make_spinner("Fetching application shell");
    let result = controller.install().await;
    spinner.finish_and_clear();
    print_install(result?);
    Ok(())
}

async fn activate(controller: &DiskController) -> Result<()> {
    let report = controller.activate().await?;
    print_activation(&report);
    Ok(())
}

async fn fetch(controller: &DiskController, url: &str, output: Option<PathBuf>) -> Result<()> {
    // Paths are taken relative to the configured origin.
    let url = if url.contains("://") {
        url.to_string()
    } else {
        controller.origin().resolve(url)
    };

    let response = match controller.fetch(&Request::get(&url)).await? {
        FetchOutcome::Respond(response) => response,
        FetchOutcome::Passthrough => {
            eprintln!("{} {url} is not managed; fetched directly", style("!").yellow());
            controller
                .fetcher()
                .fetch(&Request::get(&url), crate::CacheMode::Default)
                .await?
        }
    };

    eprintln!(
        "{} {} ({})",
        response.status,
        url,
        format_bytes(response.body.len() as u64)
    );
    match output {
        Some(path) => tokio::fs::write(&path, &response.body).await?,
        None => std::io::stdout().write_all(&response.body)?,
    }
    Ok(())
}

async fn warm(controller: &DiskController) -> Result<()> {
    let spinner = make_spinner("Caching resources for offline use");
    let result = controller.download_offline().await;
    spinner.finish_and_clear();
    print_warm_summary(&result?);
    Ok(())
}

async fn message(controller: &DiskController, text: &str) -> Result<()> {
    let command = Command::from(text);
    if let Command::Unknown(other) = &command {
        eprintln!("{} unknown message {other:?} ignored", style("!").yellow());
        return Ok(());
    }
    if let Some(report) = controller.message(&command).await? {
        print_warm_summary(&report);
    } else {
        println!("{} {text}", style("✓").green().bold());
    }
    Ok(())
}

async fn status(controller: &DiskController) -> Result<()> {
    let storage = controller.storage();
    let names = &controller.config().cache_names;

    let mut stores = Vec::new();
    let mut cached_keys = HashSet::new();
    for name in names.all() {
        let entries = if storage.has(name).await? {
            let keys = storage.open(name).await?.keys().await?;
            if name == names.content {
                cached_keys.extend(
                    keys.iter()
                        .filter_map(|key| entry_key(controller.origin(), &key.url)),
                );
            }
            Some(keys.len())
        } else {
            None
        };
        stores.push(StoreLine {
            name: name.to_string(),
            entries,
        });
    }

    let current = &controller.deployment().resources;
    let cached = current.keys().filter(|key| cached_keys.contains(*key)).count();
    let recorded = controller.recorded_manifest().await?.map(|previous| {
        let changed = current
            .keys()
            .filter(|key| previous.fingerprint(key) != current.fingerprint(key))
            .count();
        (previous.len(), changed)
    });

    print_status(
        controller.origin().as_str(),
        &stores,
        current.len(),
        cached,
        recorded,
    );
    Ok(())
}

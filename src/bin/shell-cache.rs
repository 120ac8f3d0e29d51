//! shell-cache CLI - install, activate and serve an offline app cache.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use clap::Parser;
use env_logger::Env;

use shell_cache::cli::{Cli, run};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "shell_cache=debug"
    } else {
        "shell_cache=info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

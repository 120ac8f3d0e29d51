//! Spinners and summary reporting for CLI commands.

use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::format::{format_bytes, format_duration};
use crate::{ActivationMode, ActivationOutcome, ActivationReport, WarmReport};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Creates a ticking spinner for a phase whose length is not known up front.
pub fn make_spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

pub fn print_install(staged: usize) {
    println!(
        "{} Staged {staged} shell resource(s)",
        style("✓").green().bold()
    );
}

/// Prints what an activation kept, evicted and promoted.
pub fn print_activation(report: &ActivationReport) {
    println!("\n{SEPARATOR}");
    match &report.outcome {
        ActivationOutcome::Activated => {
            let mode = match report.mode {
                Some(ActivationMode::Bootstrap) => "bootstrap",
                Some(ActivationMode::Diff) | None => "upgrade",
            };
            println!("Activated ({})", style(mode).cyan());
        }
        ActivationOutcome::RolledBack { reason } => {
            println!("{} {reason}", style("Rolled back:").red().bold());
            println!("  All caches were cleared; the next activation starts from scratch.");
        }
    }
    println!("{SEPARATOR}");
    println!("  Promoted from staging:  {}", report.promoted.len());
    println!("  Kept (unchanged):       {}", report.preserved.len());
    println!("  Evicted:                {}", report.evicted.len());
    for key in &report.evicted {
        println!("    {} {key}", style("-").red());
    }
    println!("{SEPARATOR}");
}

/// Prints a summary of an offline warming pass.
pub fn print_warm_summary(report: &WarmReport) {
    println!("\n{SEPARATOR}");
    println!("Offline Warming Summary");
    println!("{SEPARATOR}");

    if report.requested == 0 {
        println!("  Every managed resource is already cached.");
    } else {
        println!("  Missing before:    {}", report.requested);
        println!("  Stored:            {}", report.fetched);
        println!("  Total size:        {}", format_bytes(report.total_bytes));
        println!("  Total time:        {}", format_duration(report.elapsed));
    }

    if !report.failed.is_empty() {
        println!("  {}", style(format!("Failed: {}", report.failed.len())).red());
        for (key, reason) in &report.failed {
            println!("    {key}: {reason}");
        }
    }

    println!("{SEPARATOR}");
}

/// One store's line in the status table.
pub struct StoreLine {
    pub name: String,
    /// `None` if the store does not exist.
    pub entries: Option<usize>,
}

/// Prints cache stores and how the recorded manifest relates to the deployment.
pub fn print_status(
    origin: &str,
    stores: &[StoreLine],
    managed: usize,
    cached: usize,
    recorded: Option<(usize, usize)>,
) {
    println!("\n{SEPARATOR}");
    println!("Origin: {}", style(origin).bold());
    println!("{SEPARATOR}");
    for store in stores {
        match store.entries {
            Some(n) => println!("  {:<24} {n} entries", store.name),
            None => println!("  {:<24} {}", store.name, style("absent").dim()),
        }
    }
    println!("{SEPARATOR}");
    println!("  Managed resources:      {managed}");
    println!("  Cached:                 {cached}");
    match recorded {
        Some((total, changed)) => {
            println!("  Recorded manifest:      {total} resources");
            println!("  Changed since record:   {changed}");
        }
        None => println!("  Recorded manifest:      {}", style("none").yellow()),
    }
    println!("{SEPARATOR}");
}

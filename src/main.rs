//! Cardkeep CLI entry point that dispatches to subcommands.

use cardkeep::cli::{Cli, Commands};
use cardkeep::config::ConfigManager;
use cardkeep::error::CardkeepResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> CardkeepResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    let mut config = config_manager.load().await?;
    if let Some(state_dir) = cli.state_dir {
        config.paths.state_dir = Some(state_dir);
    }

    init_logging(cli.verbose, &config.general.log_format);
    debug!("Using config {}", config_manager.path().display());

    if let Commands::Config(args) = cli.command {
        return cardkeep::cli::commands::config(args, &config, &config_manager).await;
    }

    ConfigManager::ensure_state_dirs(&config).await?;

    match cli.command {
        Commands::Config(_) => unreachable!("Config handled above"),
        Commands::Fetch(args) => cardkeep::cli::commands::fetch(args, &config).await,
        Commands::Generate(args) => cardkeep::cli::commands::generate(args, &config).await,
        Commands::Circuit(args) => cardkeep::cli::commands::circuit(args, &config).await,
        Commands::Cache(args) => cardkeep::cli::commands::cache(args, &config).await,
        Commands::Runs(args) => cardkeep::cli::commands::runs(args, &config).await,
    }
}

/// Logs go to stderr: 0 = warn, 1 = info, 2+ = debug
fn init_logging(verbose: u8, format: &str) {
    let filter = match verbose {
        0 => EnvFilter::new("cardkeep=warn"),
        1 => EnvFilter::new("cardkeep=info"),
        _ => EnvFilter::new("cardkeep=debug"),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}

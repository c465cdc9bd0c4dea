//! lambda-pack - reproducible deployment archive builder
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use lambda_pack::cli::{Cli, Commands};
use lambda_pack::config::{Config, ConfigManager};
use lambda_pack::error::PackResult;
use lambda_pack::request::parse_yes_no;
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

async fn run() -> PackResult<()> {
    let cli = Cli::parse();

    let config_manager = match &cli.config {
        Some(path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let mut config = config_manager.load().await?;

    init_logging(&cli, &config);
    debug!("configuration: {}", config_manager.path().display());

    // Environment toggles override the configuration file
    if let Some(value) = &cli.pattern_comments {
        config.packaging.pattern_comments = parse_yes_no(value)?;
    }
    let recreate_missing_package = cli
        .recreate_missing_package
        .as_deref()
        .map(parse_yes_no)
        .transpose()?;

    match cli.command {
        Commands::Prepare => {
            lambda_pack::cli::commands::prepare(&config, recreate_missing_package).await
        }
        Commands::Build(args) => lambda_pack::cli::commands::build(args, &config).await,
        Commands::Zip(args) => lambda_pack::cli::commands::zip(args).await,
        Commands::Hash(args) => lambda_pack::cli::commands::hash(args).await,
    }
}

/// Logs always go to stderr; stdout carries the JSON response
fn init_logging(cli: &Cli, config: &Config) {
    let level = match cli.verbose {
        0 => cli
            .log_level
            .as_deref()
            .and_then(level_from_name)
            .or_else(|| config.general.log_level.as_deref().and_then(level_from_name))
            .unwrap_or("info"),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::new(format!("lambda_pack={}", level));

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .without_time()
            .init();
    }
}

/// Map a log level name, including the extended debug levels, to a filter level
fn level_from_name(name: &str) -> Option<&'static str> {
    match name.trim().to_ascii_uppercase().as_str() {
        "CRITICAL" | "FATAL" | "ERROR" => Some("error"),
        "WARNING" | "WARN" => Some("warn"),
        "INFO" => Some("info"),
        "DEBUG" => Some("debug"),
        "DEBUG2" | "DEBUG3" | "DUMP_ENV" | "TRACE" => Some("trace"),
        _ => None,
    }
}

//! post-classifier CLI entry point

use anyhow::Result;
use clap::Parser;
use post_classifier_domain::usecases::RunError;
use post_classifier_domain::{ConfigError, CoverageError, TaxonomyError};
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod args;
mod commands;
mod config;

use args::{Cli, Commands};
use config::AppConfig;

/// Coverage invariants unmet; the report was still written
const EXIT_COVERAGE: u8 = 2;
/// Invalid taxonomy or classifier configuration
const EXIT_CONFIG: u8 = 3;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Flag wins over the config file
    let log_level = cli
        .log_level
        .clone()
        .or_else(|| {
            AppConfig::load(cli.config.as_deref())
                .ok()
                .map(|config| config.general.log_level)
        })
        .unwrap_or_else(|| "info".to_string());
    if let Err(e) = init_logging(&log_level) {
        eprintln!("Error: {:#}", e);
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Classify(args) => commands::classify::execute(args, cli.config).await,
        Commands::Taxonomy(args) => commands::taxonomy::execute(args, cli.config).await,
        Commands::Config(args) => commands::config::execute(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

fn exit_code(error: &anyhow::Error) -> u8 {
    for cause in error.chain() {
        if cause.is::<CoverageError>() {
            return EXIT_COVERAGE;
        }
        if cause.is::<ConfigError>() || cause.is::<TaxonomyError>() {
            return EXIT_CONFIG;
        }
        if let Some(RunError::Taxonomy(_)) = cause.downcast_ref::<RunError>() {
            return EXIT_CONFIG;
        }
    }
    1
}

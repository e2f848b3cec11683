//! lull - drive the render scheduler from scenario files.

use anyhow::{Context, Result};
use clap::{ColorChoice, Parser};
use lull::cli::{Cli, Commands};
use lull::{SchedulerConfig, logger};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global color override based on CLI option
    match cli.color {
        ColorChoice::Always => owo_colors::set_override(true),
        ColorChoice::Never => owo_colors::set_override(false),
        ColorChoice::Auto => {} // owo-colors auto-detects TTY
    }
    logger::set_verbose(cli.verbose);

    let config_path = cli.config.as_deref();
    let config = SchedulerConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("failed to load config `{}`", path.display()),
        None => "invalid default config".to_string(),
    })?;

    match &cli.command {
        Commands::Run { scenario, strict } => lull::cli::run::run_scenario(scenario, config, *strict),
        Commands::Check { scenarios } => lull::cli::run::check(config_path, scenarios),
    }
}

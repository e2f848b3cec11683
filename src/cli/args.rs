//! Command-line interface definitions.

use clap::{ColorChoice, Parser, Subcommand};
use std::path::PathBuf;

/// lull render scheduler CLI
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Control colored output (auto, always, never)
    #[arg(long, global = true, default_value = "auto")]
    pub color: ColorChoice,

    /// Print scheduler decisions (enqueue, suspension, capture, commit)
    #[arg(short = 'V', long, global = true)]
    pub verbose: bool,

    /// Config file path (defaults apply when omitted)
    #[arg(short = 'C', long, global = true, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run a scenario and print every commit
    #[command(visible_alias = "r")]
    Run {
        /// Scenario file (TOML)
        #[arg(value_hint = clap::ValueHint::FilePath)]
        scenario: PathBuf,

        /// Exit with an error if any task failed or is still blocked at the end
        #[arg(short, long)]
        strict: bool,
    },

    /// Validate the config and, optionally, scenario files without running them
    #[command(visible_alias = "c")]
    Check {
        /// Scenario files to validate
        #[arg(value_name = "SCENARIO", value_hint = clap::ValueHint::FilePath)]
        scenarios: Vec<PathBuf>,
    },
}

#[allow(unused)]
impl Cli {
    pub const fn is_run(&self) -> bool {
        matches!(self.command, Commands::Run { .. })
    }
    pub const fn is_check(&self) -> bool {
        matches!(self.command, Commands::Check { .. })
    }
}

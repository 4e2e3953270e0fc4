//! CLI argument definitions using clap
//!
//! Commands:
//! - canary init --config <path>
//! - canary exec --config <path>
//! - canary route --config <path> --function <f> --alias <a>
//! - canary inspect --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// canary - version aliases, weighted traffic splits and admission control
#[derive(Parser, Debug)]
#[command(name = "canary")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an empty routing state file
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./canary.json")]
        config: PathBuf,
    },

    /// Apply newline-delimited JSON requests read from stdin
    Exec {
        /// Path to configuration file
        #[arg(long, default_value = "./canary.json")]
        config: PathBuf,
    },

    /// Sample the traffic split of an alias
    Route {
        /// Path to configuration file
        #[arg(long, default_value = "./canary.json")]
        config: PathBuf,

        /// Function name
        #[arg(long)]
        function: String,

        /// Alias name
        #[arg(long)]
        alias: String,

        /// Number of routing draws
        #[arg(long, default_value_t = 1000)]
        draws: u64,

        /// Seed for a reproducible sample
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Print functions, versions, aliases and reservations
    Inspect {
        /// Path to configuration file
        #[arg(long, default_value = "./canary.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Raw `clap`-derived CLI structure (spec §6's flag table).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "sandfly", about = "DAQ control-plane conductor", version)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the conductor and run until cancelled.
    Run {
        /// Enable the status relayer (`post-to-slack`).
        #[arg(long, default_value_t = false)]
        post_to_slack: bool,

        /// Auto-activate the controller at startup (`daq.activate-at-startup`).
        #[arg(long, default_value_t = false)]
        activate_at_startup: bool,

        /// Number of parallel output files (`daq.n-files`).
        #[arg(short = 'n', long, default_value_t = 1)]
        n_files: usize,

        /// Default run duration in ms, `0` = indefinite (`daq.duration`).
        #[arg(short = 'd', long, default_value_t = 0)]
        duration_ms: u64,

        /// File rotation threshold in MB (`daq.max-file-size-mb`).
        #[arg(short = 'm', long, default_value_t = 500.0)]
        max_file_size_mb: f64,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Run { post_to_slack: false, activate_at_startup: false, n_files: 1, duration_ms: 0, max_file_size_mb: 500.0 }
    }
}

/// Parses `std::env::args()` into a [`Cli`].
pub fn parse_cli() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_defaults() {
        let cli = Cli::parse_from(["sandfly", "run"]);
        match cli.command {
            Commands::Run { n_files, duration_ms, max_file_size_mb, .. } => {
                assert_eq!(n_files, 1);
                assert_eq!(duration_ms, 0);
                assert_eq!(max_file_size_mb, 500.0);
            }
        }
    }

    #[test]
    fn parses_run_with_overrides() {
        let cli = Cli::parse_from(["sandfly", "run", "-n", "3", "-d", "1500", "--activate-at-startup"]);
        match cli.command {
            Commands::Run { n_files, duration_ms, activate_at_startup, .. } => {
                assert_eq!(n_files, 3);
                assert_eq!(duration_ms, 1500);
                assert!(activate_at_startup);
            }
        }
    }
}

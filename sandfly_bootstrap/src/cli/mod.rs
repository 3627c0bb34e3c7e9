// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Command-Line Interface Module
//!
//! Bootstrap-layer CLI handling with security-first design.
//!
//! ```text
//! 1. parser::parse_cli()     Parse CLI with clap
//! 2. validator::validate()   Security + range validation
//! 3. ValidatedCli            Safe, validated config
//! ```

pub mod parser;
pub mod validator;

pub use parser::{parse_cli, Cli, Commands};
pub use validator::{ParseError, SecureArgParser};

use std::path::PathBuf;

/// Validated CLI configuration: every path is existence-checked (where
/// applicable) and every numeric value is range-checked.
#[derive(Debug, Clone)]
pub struct ValidatedCli {
    pub command: ValidatedCommand,
    pub verbose: bool,
    pub config: Option<PathBuf>,
}

/// Validated command variants.
#[derive(Debug, Clone)]
pub enum ValidatedCommand {
    /// Run the conductor. The only subcommand Sandfly exposes; the CLI's
    /// `daq`-prefixed flags map directly onto spec §6's config paths.
    Run {
        post_to_slack: bool,
        activate_at_startup: bool,
        n_files: usize,
        duration_ms: u64,
        max_file_size_mb: f64,
    },
}

/// Parses CLI arguments and validates them, combining `parser::parse_cli`
/// with range/path validation.
pub fn parse_and_validate() -> Result<ValidatedCli, ParseError> {
    let cli = parser::parse_cli();
    validate_cli(cli)
}

fn validate_cli(cli: Cli) -> Result<ValidatedCli, ParseError> {
    let config = if let Some(ref path) = cli.config {
        Some(SecureArgParser::validate_path(&path.to_string_lossy())?)
    } else {
        None
    };

    let Commands::Run { post_to_slack, activate_at_startup, n_files, duration_ms, max_file_size_mb } = cli.command;

    if n_files == 0 || n_files > 64 {
        return Err(ParseError::InvalidValue { arg: "n-files".to_string(), reason: "must be between 1 and 64".to_string() });
    }
    if max_file_size_mb <= 0.0 {
        // spec §9 open question: max=0 degenerates to a per-record switch;
        // we tighten this to a hard validation error at configuration time.
        return Err(ParseError::InvalidValue {
            arg: "max-file-size-mb".to_string(),
            reason: "must be greater than 0".to_string(),
        });
    }

    Ok(ValidatedCli {
        command: ValidatedCommand::Run { post_to_slack, activate_at_startup, n_files, duration_ms, max_file_size_mb },
        verbose: cli.verbose,
        config,
    })
}

// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Security Validation Layer
//!
//! Validates raw CLI arguments before they become trusted,
//! [`super::ValidatedCli`] values: paths must exist and canonicalize
//! cleanly, and string arguments must not contain shell metacharacters
//! that would be dangerous if ever interpolated into a subprocess call.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ParseError {
    #[error("invalid value for '{arg}': {reason}")]
    InvalidValue { arg: String, reason: String },

    #[error("path does not exist: {0}")]
    PathNotFound(String),

    #[error("path contains invalid characters: {0}")]
    InvalidPath(String),
}

pub struct SecureArgParser;

impl SecureArgParser {
    /// Validates a path argument that is expected to already exist,
    /// returning its canonicalized form.
    pub fn validate_path(raw: &str) -> Result<PathBuf, ParseError> {
        Self::validate_argument(raw)?;
        let path = Path::new(raw);
        path.canonicalize().map_err(|_| ParseError::PathNotFound(raw.to_string()))
    }

    /// Validates a string argument for dangerous shell metacharacters,
    /// without requiring the value to name an existing path.
    pub fn validate_argument(raw: &str) -> Result<(), ParseError> {
        const DANGEROUS: &[char] = &[';', '|', '&', '$', '`', '\n', '\0'];
        if raw.chars().any(|c| DANGEROUS.contains(&c)) {
            return Err(ParseError::InvalidPath(raw.to_string()));
        }
        Ok(())
    }
}

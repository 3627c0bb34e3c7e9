// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Process Exit Codes
//!
//! Maps a [`SandflyError`] category onto a process exit code
//! (spec §6: "0 success, nonzero on any fatal path").

use sandfly_domain::SandflyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    ConfigError = 64,
    StateError = 65,
    ResourceError = 70,
    EngineError = 71,
    Timeout = 72,
    ProtocolError = 73,
    RotatorStuck = 74,
    Unknown = 1,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

pub fn map_error_to_exit_code(err: &SandflyError) -> ExitCode {
    match err {
        SandflyError::Config(_) => ExitCode::ConfigError,
        SandflyError::State { .. } => ExitCode::StateError,
        SandflyError::Resource(_) => ExitCode::ResourceError,
        SandflyError::EngineNonFatal(_) | SandflyError::EngineFatal(_) => ExitCode::EngineError,
        SandflyError::Timeout(_) => ExitCode::Timeout,
        SandflyError::Protocol(_) => ExitCode::ProtocolError,
        SandflyError::RotatorStuck(_) => ExitCode::RotatorStuck,
        SandflyError::Io(_) | SandflyError::Serde(_) => ExitCode::Unknown,
    }
}

pub fn result_to_exit_code<T>(result: &Result<T, SandflyError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::Success,
        Err(err) => map_error_to_exit_code(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_zero() {
        let ok: Result<(), SandflyError> = Ok(());
        assert_eq!(result_to_exit_code(&ok).as_i32(), 0);
    }

    #[test]
    fn resource_error_is_nonzero() {
        let err: Result<(), SandflyError> = Err(SandflyError::resource("disk full"));
        assert_ne!(result_to_exit_code(&err).as_i32(), 0);
    }
}

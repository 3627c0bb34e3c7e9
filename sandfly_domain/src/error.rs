// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Domain Error Taxonomy
//!
//! [`SandflyError`] realizes the seven error kinds this system distinguishes:
//! configuration, state, resource, engine non-fatal, engine fatal, timeout,
//! and protocol errors. `category()` partitions variants along those kinds;
//! `is_recoverable()`/`is_fatal()` drive the escalation policy (only
//! resource and engine-fatal errors trigger a process-wide cancel).

use thiserror::Error;

/// Errors produced anywhere in the Sandfly control-plane core.
#[derive(Error, Debug, Clone)]
pub enum SandflyError {
    /// Malformed configuration tree, missing required key, or bad enum value.
    #[error("configuration error: {0}")]
    Config(String),

    /// An illegal state transition was requested; the component remains usable.
    #[error("illegal transition from {from} via {action}")]
    State { from: String, action: String },

    /// A resource could not be acquired or released (pipeline Package, output
    /// file, transport connection). Escalates to a process-wide cancel.
    #[error("resource error: {0}")]
    Resource(String),

    /// The pipeline engine reported a recoverable node failure.
    #[error("engine non-fatal error: {0}")]
    EngineNonFatal(String),

    /// The pipeline engine reported an unrecoverable error.
    #[error("engine fatal error: {0}")]
    EngineFatal(String),

    /// A bounded wait (drain, ready condition) exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// An RPC specifier was malformed or did not match a registered handler.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The rotator could not drain its writers within the escalated deadline.
    #[error("rotator stuck: {0}")]
    RotatorStuck(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serde(String),
}

impl SandflyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn state(from: impl Into<String>, action: impl Into<String>) -> Self {
        Self::State { from: from.into(), action: action.into() }
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Coarse category for logging and reply-code mapping.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "configuration",
            Self::State { .. } => "state",
            Self::Resource(_) => "resource",
            Self::EngineNonFatal(_) => "engine_non_fatal",
            Self::EngineFatal(_) => "engine_fatal",
            Self::Timeout(_) => "timeout",
            Self::Protocol(_) => "protocol",
            Self::RotatorStuck(_) => "rotator_stuck",
            Self::Io(_) => "io",
            Self::Serde(_) => "serde",
        }
    }

    /// True when the component that raised this error remains usable
    /// without a process-wide cancel.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::State { .. } | Self::Protocol(_) | Self::EngineNonFatal(_)
        )
    }

    /// True when this error must escalate to a process-wide cancel
    /// (spec: "Only resource and engine-fatal errors escalate").
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Resource(_) | Self::EngineFatal(_) | Self::RotatorStuck(_))
    }
}

impl From<std::io::Error> for SandflyError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SandflyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err.to_string())
    }
}

/// Reply codes surfaced over the RPC bus. Codes `>= 100` are errors; codes
/// `>= 200` are fatal-equivalent (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    Ok,
    SandflyError_,
    SandflyNotEnabled,
    SandflyRunning,
}

impl ReplyCode {
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::SandflyError_ => 1100,
            Self::SandflyNotEnabled => 1101,
            Self::SandflyRunning => 1102,
        }
    }

    pub fn is_error(self) -> bool {
        self.as_u32() >= 100
    }
}

// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Node Binding Port
//!
//! An object that knows how to apply a configuration tree to a live node
//! of a specific kind, dump its config, and run named commands (spec
//! GLOSSARY, §4.3). Downcast targets are trait objects registered by the
//! Pipeline Facade, mirrored on the teacher's `StageService` trait-object
//! registry pattern.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SandflyError;

#[async_trait]
pub trait NodeBinding: Send + Sync {
    /// Merges or overwrites this node's builder configuration.
    fn apply_config(&mut self, config: &Value) -> Result<(), SandflyError>;

    /// Reads back this node's current builder configuration.
    fn dump_config(&self) -> Value;

    /// Attempts to run a named command on the live node. Returns `false`
    /// (not an error) when the command is unrecognized, per spec §4.3:
    /// "unrecognized commands return false rather than raising".
    async fn run_command(&self, cmd: &str, args: &Value) -> Result<bool, SandflyError>;
}

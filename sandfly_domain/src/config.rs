// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Configuration Tree
//!
//! The recognized configuration keys (spec §6). Loading (file + env +
//! CLI-override layering) is an infrastructure concern handled by
//! `sandfly::config`; this module only defines the shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SandflyConfig {
    /// Opaque to this spec; forwarded to the transport. Spec names this key
    /// with an underscore, unlike every other top-level key.
    #[serde(rename = "dripline_mesh")]
    pub dripline_mesh: Value,
    /// `{ "<code>": "<batch-command-name>" }`.
    pub set_conditions: HashMap<String, String>,
    /// `{ "<name>": [action, ...] }`.
    pub batch_commands: HashMap<String, Vec<Value>>,
    /// `[action, ...]` to enqueue at boot.
    pub on_startup: Vec<Value>,
    pub daq: DaqConfig,
    /// `{ "<stream-name>": {...} }`.
    pub streams: HashMap<String, Value>,
    pub post_to_slack: bool,
}

impl Default for SandflyConfig {
    fn default() -> Self {
        Self {
            dripline_mesh: Value::Object(Default::default()),
            set_conditions: HashMap::new(),
            batch_commands: HashMap::new(),
            on_startup: Vec::new(),
            daq: DaqConfig::default(),
            streams: HashMap::new(),
            post_to_slack: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DaqConfig {
    pub activate_at_startup: bool,
    pub n_files: usize,
    /// Default run duration in ms; `0` means run indefinitely (spec §8).
    pub duration: u64,
    pub max_file_size_mb: f64,
}

impl Default for DaqConfig {
    fn default() -> Self {
        Self { activate_at_startup: false, n_files: 1, duration: 0, max_file_size_mb: 500.0 }
    }
}

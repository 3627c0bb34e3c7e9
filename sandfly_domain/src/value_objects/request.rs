// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! An RPC request dispatched by the Request Receiver (spec §4.5). The
//! routing specifier is a dotted hierarchical address
//! (`active-config.s1.node2.gain`, GLOSSARY "Routing specifier").

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcVerb {
    Get,
    Set,
    Cmd,
    /// The dedicated "run" verb (spec §4.4's `start-run` handler table row).
    Run,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub routing_key: String,
    pub specifier: String,
    pub op: RpcVerb,
    pub payload: Value,
}

impl Request {
    pub fn new(routing_key: impl Into<String>, specifier: impl Into<String>, op: RpcVerb, payload: Value) -> Self {
        Self { routing_key: routing_key.into(), specifier: specifier.into(), op, payload }
    }

    /// The dotted specifier split into segments, used to match the first
    /// segment against the handler registry (spec §4.5).
    pub fn specifier_segments(&self) -> Vec<&str> {
        self.specifier.split('.').collect()
    }
}

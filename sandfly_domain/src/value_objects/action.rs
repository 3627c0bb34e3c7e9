// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Batch Action
//!
//! Produced once by the Batch Executor's parser, consumed once by the
//! executor loop (spec §3, §4.6, §6's action schema).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::SandflyError;

/// RPC verb an action performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOp {
    Get,
    Set,
    Cmd,
    WaitForStatusNotRunning,
}

impl ActionOp {
    fn parse(raw: &str) -> Result<Self, SandflyError> {
        match raw {
            "get" => Ok(Self::Get),
            "set" => Ok(Self::Set),
            "cmd" => Ok(Self::Cmd),
            "wait-for" => Ok(Self::WaitForStatusNotRunning),
            other => Err(SandflyError::config(format!("unknown action type '{other}'"))),
        }
    }
}

/// One queued RPC-style action (spec §3 "Action").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub routing_key: String,
    pub specifier: Option<String>,
    pub op: ActionOp,
    pub payload: Value,
    #[serde(default = "default_sleep_after_ms")]
    pub sleep_after_ms: u64,
    #[serde(default)]
    pub is_custom_poll: bool,
}

fn default_sleep_after_ms() -> u64 {
    500
}

impl Action {
    /// Parses one action spec (`{type, key, specifier?, payload, sleep-for?}`)
    /// into an [`Action`]. `type = "wait-for"` with `key = "daq-status"`
    /// becomes a `get` with `is_custom_poll = true` (spec §4.6).
    pub fn parse(spec: &Value) -> Result<Self, SandflyError> {
        let obj = spec
            .as_object()
            .ok_or_else(|| SandflyError::config("action spec must be an object"))?;

        let raw_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SandflyError::config("action spec missing 'type'"))?;
        let routing_key = obj
            .get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| SandflyError::config("action spec missing 'key'"))?
            .to_string();
        let payload = obj.get("payload").cloned().unwrap_or(Value::Object(Default::default()));
        let specifier = obj.get("specifier").and_then(Value::as_str).map(str::to_string);
        let sleep_after_ms = obj
            .get("sleep-for")
            .and_then(Value::as_u64)
            .unwrap_or_else(default_sleep_after_ms);

        let is_wait_for = raw_type == "wait-for";
        let op = if is_wait_for { ActionOp::Get } else { ActionOp::parse(raw_type)? };
        let is_custom_poll = is_wait_for && routing_key == "daq-status";

        Ok(Self { routing_key, specifier, op, payload, sleep_after_ms, is_custom_poll })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_cmd_action() {
        let spec = json!({"type": "cmd", "key": "start-run", "payload": {}});
        let action = Action::parse(&spec).unwrap();
        assert_eq!(action.op, ActionOp::Cmd);
        assert_eq!(action.routing_key, "start-run");
        assert_eq!(action.sleep_after_ms, 500);
        assert!(!action.is_custom_poll);
    }

    #[test]
    fn wait_for_daq_status_is_custom_poll() {
        let spec = json!({"type": "wait-for", "key": "daq-status", "payload": {}, "sleep-for": 100});
        let action = Action::parse(&spec).unwrap();
        assert_eq!(action.op, ActionOp::Get);
        assert!(action.is_custom_poll);
        assert_eq!(action.sleep_after_ms, 100);
    }

    #[test]
    fn rejects_unknown_type() {
        let spec = json!({"type": "bogus", "key": "x", "payload": {}});
        assert!(Action::parse(&spec).is_err());
    }

    #[test]
    fn rejects_missing_key() {
        let spec = json!({"type": "get", "payload": {}});
        assert!(Action::parse(&spec).is_err());
    }
}

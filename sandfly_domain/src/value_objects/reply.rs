// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Reply produced by a handler (spec §6's reply schema). Return codes
//! `>= 100` are errors; `>= 200` are fatal-equivalent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ReplyCode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub return_code: u32,
    pub return_message: String,
    pub payload: Value,
}

impl Reply {
    pub fn ok(payload: Value) -> Self {
        Self { return_code: ReplyCode::Ok.as_u32(), return_message: "OK".into(), payload }
    }

    pub fn error(code: ReplyCode, message: impl Into<String>) -> Self {
        Self { return_code: code.as_u32(), return_message: message.into(), payload: Value::Object(Default::default()) }
    }

    pub fn is_error(&self) -> bool {
        self.return_code >= 100
    }

    pub fn is_fatal_equivalent(&self) -> bool {
        self.return_code >= 200
    }
}

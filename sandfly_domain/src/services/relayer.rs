// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Message Relayer Port
//!
//! Optional out-of-band status/warning sink, enabled by `--post-to-slack`
//! (spec §6, §9). The default is a no-op, mirroring the original's
//! `null_relayer`.

use async_trait::async_trait;

use crate::value_objects::RunState;

#[async_trait]
pub trait MessageRelayer: Send + Sync {
    async fn post_status(&self, status: RunState);
    async fn post_warning(&self, message: &str);
}

/// No-op relayer used when `post-to-slack` is disabled.
#[derive(Debug, Default)]
pub struct NullRelayer;

#[async_trait]
impl MessageRelayer for NullRelayer {
    async fn post_status(&self, _status: RunState) {}
    async fn post_warning(&self, _message: &str) {}
}

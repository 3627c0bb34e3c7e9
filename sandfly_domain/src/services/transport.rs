// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Transport Port
//!
//! The AMQP/RPC transport and its message encoding (spec §1). We specify
//! how handlers are registered and how replies are formed, not the wire
//! protocol.

use async_trait::async_trait;

use crate::error::SandflyError;
use crate::value_objects::{Reply, Request};

/// Delivers inbound requests one at a time and lets the dispatch path
/// submit outgoing replies; the wire protocol and message correlation are
/// opaque here (spec §1).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the underlying connection ("make connection", spec §4.5).
    async fn connect(&self) -> Result<(), SandflyError>;

    /// Blocks until the next inbound request arrives, or `None` once the
    /// connection has been closed (spec §4.5 "listen loop"). Handlers run
    /// serially: the receiver calls `recv` again only after replying to
    /// the previous request.
    async fn recv(&self) -> Result<Option<Request>, SandflyError>;

    /// Breaks a running listen loop.
    async fn stop(&self) -> Result<(), SandflyError>;

    /// Sends the reply for the request most recently returned by `recv`.
    async fn send_reply(&self, reply: Reply) -> Result<(), SandflyError>;
}

// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Sandfly Domain
//!
//! Pure value objects, entities, domain errors, and external-collaborator
//! ports for the Sandfly DAQ control-plane core. This crate has no runtime
//! dependency and no logging: infrastructure (the `sandfly` crate) is the
//! only place that drives a `tokio` runtime or emits `tracing` output.
//!
//! ## Layout
//!
//! - [`error`] — [`SandflyError`] and the reply-code taxonomy.
//! - [`value_objects`] — `RunState`, `ConductorStatus`, `Action`, `Reply`,
//!   `FileInfo`, `RotatorStage`.
//! - [`entities`] — `Record`, `FileHeader`.
//! - [`services`] — ports for the three external collaborators: the
//!   pipeline engine, the node binding / record-file library, and the RPC
//!   transport, plus the optional status relayer.
//! - [`config`] — the serde-deserializable configuration tree.

pub mod config;
pub mod entities;
pub mod error;
pub mod services;
pub mod value_objects;

pub use error::{ReplyCode, SandflyError};
pub use value_objects::{Action, ActionOp, ConductorStatus, FileInfo, Reply, Request, RotatorStage, RpcVerb, RunState};

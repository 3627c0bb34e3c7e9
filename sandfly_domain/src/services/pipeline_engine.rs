// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Engine Port
//!
//! The underlying stream/node execution runtime: a runnable bundle of nodes
//! with `run`, `cancel`, `pause`, `resume`, and a running-callback hook
//! (spec §1). We specify only the interface the core uses, not the DSP
//! graph itself.

use async_trait::async_trait;

use crate::error::SandflyError;

/// Outcome of a completed `run()` call, used by the Run Controller to
/// classify engine errors (spec §4.4 "Engine error mapping").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineOutcome {
    /// The run exited normally (paused/cancelled as requested).
    Normal,
    /// A recoverable node failure was reported.
    NodeNonFatal(String),
    /// An unrecoverable node or engine failure was reported.
    NodeFatal(String),
}

/// Port to the pipeline engine that executes a connected graph of
/// processing nodes to completion, returning when paused or cancelled.
#[async_trait]
pub trait PipelineEngine: Send + Sync {
    /// Runs the given terminator-separated node list to completion,
    /// invoking `on_running` once the graph is actually executing
    /// (spec §4.4: "activated is entered only ... via the pipeline's
    /// running-callback").
    async fn run(&self, run_string: &str, on_running: Box<dyn FnOnce() + Send>) -> Result<EngineOutcome, SandflyError>;

    /// Requests cancellation of the current run.
    async fn cancel(&self) -> Result<(), SandflyError>;

    /// Pauses a running graph (ends a `running` interval, spec §4.4).
    async fn pause(&self) -> Result<(), SandflyError>;

    /// Resumes a paused graph (begins a `running` interval).
    async fn resume(&self) -> Result<(), SandflyError>;
}

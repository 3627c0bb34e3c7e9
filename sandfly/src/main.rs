// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Sandfly Binary
//!
//! Wires the bootstrap CLI, configuration loading, and signal handling
//! around the [`sandfly::Conductor`]. The pipeline engine, node bindings,
//! record container, and RPC transport are external collaborators
//! (spec §1); this entry point wires in no-op defaults so the binary runs
//! standalone, and a real deployment substitutes concrete adapters for
//! [`ConductorDeps`](sandfly::conductor::ConductorDeps).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sandfly::conductor::{Conductor, ConductorDeps};
use sandfly_bootstrap::shutdown::CancelSource;
use sandfly_bootstrap::signals::install_signal_handlers;
use sandfly_bootstrap::{bootstrap_cli, logger, map_error_to_exit_code};
use sandfly_domain::entities::FileHeader;
use sandfly_domain::services::{EngineOutcome, MessageRelayer, NodeBinding, NullRelayer, PipelineEngine, RecordContainer, Transport};
use sandfly_domain::{Reply, Request, RunState, SandflyError};
use serde_json::Value;
use tracing::{error, info, warn};

/// Stays "running" until cancelled; stands in for a real pipeline runtime.
struct IdleEngine;

#[async_trait]
impl PipelineEngine for IdleEngine {
    async fn run(&self, run_string: &str, on_running: Box<dyn FnOnce() + Send>) -> Result<EngineOutcome, SandflyError> {
        info!(run_string, "idle engine activated (no node types registered)");
        on_running();
        std::future::pending::<()>().await;
        Ok(EngineOutcome::Normal)
    }
    async fn cancel(&self) -> Result<(), SandflyError> {
        Ok(())
    }
    async fn pause(&self) -> Result<(), SandflyError> {
        Ok(())
    }
    async fn resume(&self) -> Result<(), SandflyError> {
        Ok(())
    }
}

/// Discards every record; stands in for the real record-file library.
struct DiscardContainer;

#[async_trait]
impl RecordContainer for DiscardContainer {
    async fn open(&self, _header: &FileHeader) -> Result<(), SandflyError> {
        Ok(())
    }
    async fn append(&self, _stream_index: usize, _record: &sandfly_domain::entities::Record) -> Result<(), SandflyError> {
        Ok(())
    }
    async fn close(&self) -> Result<(), SandflyError> {
        Ok(())
    }
}

/// Never receives a request; stands in for the AMQP/RPC transport. The
/// receiver's listen loop races `recv()` against the cancel token, so this
/// simply leaves the receiver parked in `Listening` until the process is
/// cancelled.
struct NoTransport;

#[async_trait]
impl Transport for NoTransport {
    async fn connect(&self) -> Result<(), SandflyError> {
        Ok(())
    }
    async fn recv(&self) -> Result<Option<Request>, SandflyError> {
        std::future::pending::<()>().await;
        Ok(None)
    }
    async fn stop(&self) -> Result<(), SandflyError> {
        Ok(())
    }
    async fn send_reply(&self, _reply: Reply) -> Result<(), SandflyError> {
        Ok(())
    }
}

/// Posts status and warnings through `tracing` instead of dropping them;
/// selected when `--post-to-slack` is set. A real deployment substitutes a
/// relayer that actually posts to Slack's webhook API — that network
/// integration is outside this spec's scope (spec §1), so this stands in as
/// the minimal concrete adapter the flag switches to.
struct TracingRelayer;

#[async_trait]
impl MessageRelayer for TracingRelayer {
    async fn post_status(&self, status: RunState) {
        info!(?status, "status relayed");
    }
    async fn post_warning(&self, message: &str) {
        warn!(warning = message, "warning relayed");
    }
}

fn rejecting_node_builder() -> sandfly::pipeline_facade::NodeBuilder {
    Arc::new(|_stream: &str, _node: &str, _config: &Value| -> Result<Box<dyn NodeBinding>, SandflyError> {
        Err(SandflyError::config("no node types registered; substitute a real NodeBuilder"))
    })
}

#[tokio::main]
async fn main() {
    let cli = match bootstrap_cli() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("argument error: {err}");
            std::process::exit(sandfly_bootstrap::ExitCode::ConfigError.as_i32());
        }
    };

    logger::init_tracing(cli.verbose);
    info!("sandfly starting");

    let config = match sandfly::config::load(cli.config.as_deref(), &cli.command) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(map_error_to_exit_code(&err).as_i32());
        }
    };

    let cancel = Arc::new(CancelSource::new(Duration::from_secs(5)));
    install_signal_handlers(cancel.clone());

    let relayer: Arc<dyn MessageRelayer> = if config.post_to_slack { Arc::new(TracingRelayer) } else { Arc::new(NullRelayer) };

    let deps = ConductorDeps {
        engine: Arc::new(IdleEngine),
        node_builder: rejecting_node_builder(),
        transport: Some(Arc::new(NoTransport)),
        container_factory: Arc::new(|_filename: &str| Arc::new(DiscardContainer) as Arc<dyn RecordContainer>),
        relayer,
    };

    let conductor = match Conductor::new(config, deps, cancel.clone()).await {
        Ok(conductor) => conductor,
        Err(err) => {
            error!(error = %err, "failed to build conductor");
            std::process::exit(map_error_to_exit_code(&err).as_i32());
        }
    };

    let code = conductor.run().await;
    info!(code, "sandfly exiting");
    std::process::exit(code);
}

// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! End-to-end Conductor scenarios (spec §8), driven over a loopback
//! `Transport` fake in place of a real AMQP broker, with a fake
//! `PipelineEngine` that stays "running" until told to stop. Grounded on
//! the teacher's `tests/integration` style: one file per cross-module
//! scenario, fakes for the external collaborators instead of mocks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sandfly::conductor::{Conductor, ConductorDeps};
use sandfly::pipeline_facade::NodeBuilder;
use sandfly_bootstrap::shutdown::CancelSource;
use sandfly_domain::config::SandflyConfig;
use sandfly_domain::entities::FileHeader;
use sandfly_domain::services::{EngineOutcome, NodeBinding, NullRelayer, PipelineEngine, RecordContainer, Transport};
use sandfly_domain::{Reply, Request, RpcVerb, RunState, SandflyError};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

/// Stays "running" until the Run Controller cancels it; never exits on
/// its own, matching the fixtures already used inside `run_controller.rs`.
struct SteadyEngine;

#[async_trait]
impl PipelineEngine for SteadyEngine {
    async fn run(&self, _run_string: &str, on_running: Box<dyn FnOnce() + Send>) -> Result<EngineOutcome, SandflyError> {
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

struct PassthroughBinding;

#[async_trait]
impl NodeBinding for PassthroughBinding {
    fn apply_config(&mut self, _config: &Value) -> Result<(), SandflyError> {
        Ok(())
    }
    fn dump_config(&self) -> Value {
        json!({})
    }
    async fn run_command(&self, _cmd: &str, _args: &Value) -> Result<bool, SandflyError> {
        Ok(false)
    }
}

fn passthrough_builder() -> NodeBuilder {
    Arc::new(|_stream: &str, _node: &str, _config: &Value| Ok(Box::new(PassthroughBinding) as Box<dyn NodeBinding>))
}

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

/// Loopback RPC transport: a test drives `request_tx` directly and reads
/// replies off `reply_rx`, standing in for a real AMQP round-trip (spec
/// §8's "a loopback Transport fake that lets tests submit requests and
/// read replies without a real AMQP broker").
struct LoopbackTransport {
    inbound: AsyncMutex<mpsc::UnboundedReceiver<Request>>,
    outbound: mpsc::UnboundedSender<Reply>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<(), SandflyError> {
        Ok(())
    }
    async fn recv(&self) -> Result<Option<Request>, SandflyError> {
        Ok(self.inbound.lock().await.recv().await)
    }
    async fn stop(&self) -> Result<(), SandflyError> {
        Ok(())
    }
    async fn send_reply(&self, reply: Reply) -> Result<(), SandflyError> {
        let _ = self.outbound.send(reply);
        Ok(())
    }
}

async fn harness(config: SandflyConfig) -> (Arc<Conductor>, mpsc::UnboundedSender<Request>, mpsc::UnboundedReceiver<Reply>, Arc<CancelSource>) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(LoopbackTransport { inbound: AsyncMutex::new(request_rx), outbound: reply_tx });

    let deps = ConductorDeps {
        engine: Arc::new(SteadyEngine),
        node_builder: passthrough_builder(),
        transport: Some(transport),
        container_factory: Arc::new(|_name: &str| Arc::new(DiscardContainer) as Arc<dyn RecordContainer>),
        relayer: Arc::new(NullRelayer),
    };

    let cancel = Arc::new(CancelSource::new(Duration::from_millis(200)));
    let conductor = Conductor::new(config, deps, cancel.clone()).await.unwrap();
    (conductor, request_tx, reply_rx, cancel)
}

fn one_stream_config() -> HashMap<String, Value> {
    HashMap::from([("s".to_string(), json!({ "n1": {} }))])
}

async fn roundtrip(tx: &mpsc::UnboundedSender<Request>, rx: &mut mpsc::UnboundedReceiver<Reply>, req: Request) -> Reply {
    tx.send(req).unwrap();
    rx.recv().await.expect("transport dropped before a reply arrived")
}

async fn wait_until(controller: impl Fn() -> RunState, target: RunState) {
    for _ in 0..200 {
        if controller() == target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for status {target:?}");
}

/// Scenario 1: activate at startup, start a timed run, let the duration
/// elapse on its own, and shut down cleanly.
#[tokio::test]
async fn happy_path_timed_run() {
    let mut config = SandflyConfig::default();
    config.streams = one_stream_config();
    config.daq.activate_at_startup = true;
    config.daq.n_files = 0;

    let (conductor, tx, mut rx, _cancel) = harness(config).await;
    let control_access = conductor.control_access();
    let run_handle = tokio::spawn(conductor.run());

    wait_until(|| control_access.try_get().unwrap().status(), RunState::Activated).await;

    let reply = roundtrip(&tx, &mut rx, Request::new("k", "start-run", RpcVerb::Cmd, json!({ "duration-ms": 300 }))).await;
    assert!(!reply.is_error());
    wait_until(|| control_access.try_get().unwrap().status(), RunState::Running).await;

    // The run's own 300 ms timer returns it to `activated` without any
    // further RPC traffic.
    wait_until(|| control_access.try_get().unwrap().status(), RunState::Activated).await;

    let reply = roundtrip(&tx, &mut rx, Request::new("k", "quit", RpcVerb::Cmd, json!({}))).await;
    assert!(!reply.is_error());

    let code = run_handle.await.unwrap();
    assert_eq!(code, 0);
}

/// Scenario 2: start a long run, then stop it manually well before the
/// deadline; the reply succeeds and status returns to `activated` within
/// one sub-duration tick.
#[tokio::test]
async fn manual_stop_before_deadline() {
    let mut config = SandflyConfig::default();
    config.streams = one_stream_config();
    config.daq.activate_at_startup = true;
    config.daq.n_files = 0;

    let (conductor, tx, mut rx, _cancel) = harness(config).await;
    let control_access = conductor.control_access();
    let run_handle = tokio::spawn(conductor.run());

    wait_until(|| control_access.try_get().unwrap().status(), RunState::Activated).await;

    let reply = roundtrip(&tx, &mut rx, Request::new("k", "start-run", RpcVerb::Cmd, json!({ "duration-ms": 60_000 }))).await;
    assert!(!reply.is_error());
    wait_until(|| control_access.try_get().unwrap().status(), RunState::Running).await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    let reply = roundtrip(&tx, &mut rx, Request::new("k", "stop-run", RpcVerb::Cmd, json!({}))).await;
    assert!(!reply.is_error());

    wait_until(|| control_access.try_get().unwrap().status(), RunState::Activated).await;
    assert_ne!(control_access.try_get().unwrap().status(), RunState::Error);

    let reply = roundtrip(&tx, &mut rx, Request::new("k", "quit", RpcVerb::Cmd, json!({}))).await;
    assert!(!reply.is_error());
    assert_eq!(run_handle.await.unwrap(), 0);
}

/// Scenario 6: a `set-condition` request routes to a named batch command,
/// which dispatches a `stop-run` internally and ends the run within one
/// sub-duration tick.
#[tokio::test]
async fn set_condition_routes_to_named_batch_command() {
    let mut config = SandflyConfig::default();
    config.streams = one_stream_config();
    config.daq.activate_at_startup = true;
    config.daq.n_files = 0;
    config.set_conditions = HashMap::from([("10".to_string(), "hard-abort".to_string())]);
    config.batch_commands = HashMap::from([("hard-abort".to_string(), vec![json!({"type": "cmd", "key": "stop-run", "payload": {}})])]);

    let (conductor, tx, mut rx, _cancel) = harness(config).await;
    let control_access = conductor.control_access();
    let run_handle = tokio::spawn(conductor.run());

    wait_until(|| control_access.try_get().unwrap().status(), RunState::Activated).await;

    let reply = roundtrip(&tx, &mut rx, Request::new("k", "start-run", RpcVerb::Cmd, json!({ "duration-ms": 60_000 }))).await;
    assert!(!reply.is_error());
    wait_until(|| control_access.try_get().unwrap().status(), RunState::Running).await;

    let reply = roundtrip(&tx, &mut rx, Request::new("k", "set-condition", RpcVerb::Cmd, json!({ "condition": "10" }))).await;
    assert!(!reply.is_error());

    wait_until(|| control_access.try_get().unwrap().status(), RunState::Activated).await;

    let reply = roundtrip(&tx, &mut rx, Request::new("k", "quit", RpcVerb::Cmd, json!({}))).await;
    assert!(!reply.is_error());
    assert_eq!(run_handle.await.unwrap(), 0);
}

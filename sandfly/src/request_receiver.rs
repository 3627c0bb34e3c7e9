// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Request Receiver (C5)
//!
//! Hosts the RPC server loop and a handler registry for `get`/`set`/`cmd`
//! plus the dedicated "run" verb, and a `set-condition` dispatcher
//! (spec §4.5).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sandfly_bootstrap::shutdown::CancelSource;
use sandfly_domain::services::Transport;
use sandfly_domain::{Reply, ReplyCode, Request, RpcVerb, SandflyError};
use tracing::{info, warn};

use crate::run_controller::RunController;

/// Lifecycle of the receiver (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ReceiverState {
    Initialized = 0,
    Starting = 1,
    Listening = 2,
    Canceled = 3,
    Done = 4,
    Error = 5,
}

/// A registered async handler for one RPC verb at one routing name.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, req: &Request) -> Reply;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Reply> + Send,
{
    async fn handle(&self, req: &Request) -> Reply {
        self(req.clone()).await
    }
}

#[derive(Default)]
struct Registry {
    get_handlers: HashMap<String, Arc<dyn Handler>>,
    set_handlers: HashMap<String, Arc<dyn Handler>>,
    cmd_handlers: HashMap<String, Arc<dyn Handler>>,
    run_handler: Option<Arc<dyn Handler>>,
}

/// Serves RPC requests by dispatching to registered handlers; blocks until
/// the Run Controller is ready (spec §4.5).
pub struct RequestReceiver {
    state: AtomicU32,
    registry: parking_lot::RwLock<Registry>,
    transport: Option<Arc<dyn Transport>>,
    controller: Arc<RunController>,
    cancel: Arc<CancelSource>,
    set_conditions: HashMap<String, String>,
}

impl RequestReceiver {
    pub fn new(controller: Arc<RunController>, transport: Option<Arc<dyn Transport>>, cancel: Arc<CancelSource>, set_conditions: HashMap<String, String>) -> Self {
        Self {
            state: AtomicU32::new(ReceiverState::Initialized as u32),
            registry: parking_lot::RwLock::new(Registry::default()),
            transport,
            controller,
            cancel,
            set_conditions,
        }
    }

    pub fn state(&self) -> ReceiverState {
        match self.state.load(Ordering::SeqCst) {
            0 => ReceiverState::Initialized,
            1 => ReceiverState::Starting,
            2 => ReceiverState::Listening,
            3 => ReceiverState::Canceled,
            4 => ReceiverState::Done,
            _ => ReceiverState::Error,
        }
    }

    fn set_state(&self, state: ReceiverState) {
        self.state.store(state as u32, Ordering::SeqCst);
    }

    pub fn register_get_handler(&self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.registry.write().get_handlers.insert(name.into(), handler);
    }

    pub fn register_set_handler(&self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.registry.write().set_handlers.insert(name.into(), handler);
    }

    pub fn register_cmd_handler(&self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.registry.write().cmd_handlers.insert(name.into(), handler);
    }

    pub fn set_run_handler(&self, handler: Arc<dyn Handler>) {
        self.registry.write().run_handler = Some(handler);
    }

    /// Blocks until the Run Controller signals ready, then — if a
    /// transport was configured — starts it and enters the listen loop
    /// until canceled.
    pub async fn execute(self: &Arc<Self>) -> Result<(), SandflyError> {
        self.set_state(ReceiverState::Starting);
        self.controller.wait_ready().await;

        let Some(transport) = &self.transport else {
            self.set_state(ReceiverState::Listening);
            self.cancel.token().cancelled().await;
            self.set_state(ReceiverState::Canceled);
            return Ok(());
        };

        transport.connect().await?;
        self.set_state(ReceiverState::Listening);

        let cancel_token = self.cancel.token();
        loop {
            let next = tokio::select! {
                req = transport.recv() => req,
                _ = cancel_token.cancelled() => {
                    transport.stop().await?;
                    self.set_state(ReceiverState::Canceled);
                    return Ok(());
                }
            };

            match next {
                Ok(Some(req)) => {
                    let reply = self.dispatch(&req).await;
                    if let Err(err) = transport.send_reply(reply).await {
                        warn!(error = %err, "failed to send reply");
                    }
                }
                Ok(None) => {
                    self.set_state(ReceiverState::Done);
                    return Ok(());
                }
                Err(err) => {
                    self.set_state(ReceiverState::Error);
                    return Err(err);
                }
            }
        }
    }

    /// Matches the specifier's first segment against the handler registry
    /// for the request's verb. `submit_request_message` is this same path,
    /// exposed so the Batch Executor can inject requests without a network
    /// round-trip.
    pub async fn submit_request_message(&self, req: &Request) -> Reply {
        self.dispatch(req).await
    }

    async fn dispatch(&self, req: &Request) -> Reply {
        if req.specifier == "set-condition" {
            return self.dispatch_set_condition(req).await;
        }

        let first_segment = req.specifier_segments().first().copied().unwrap_or_default().to_string();
        let handler = {
            let registry = self.registry.read();
            match req.op {
                RpcVerb::Get => registry.get_handlers.get(&first_segment).cloned(),
                RpcVerb::Set => registry.set_handlers.get(&first_segment).cloned(),
                RpcVerb::Cmd => registry.cmd_handlers.get(&first_segment).cloned(),
                RpcVerb::Run => registry.run_handler.clone(),
            }
        };

        match handler {
            Some(handler) => handler.handle(req).await,
            None => {
                warn!(specifier = %req.specifier, "no handler registered");
                Reply::error(ReplyCode::SandflyError_, "invalid_method")
            }
        }
    }

    /// Looks up the numeric condition code in the configured table and,
    /// if present, synthesizes an internal `cmd` request dispatched to the
    /// local path; the reply is relayed back verbatim (spec §4.5).
    async fn dispatch_set_condition(&self, req: &Request) -> Reply {
        let code = req.payload.get("condition").and_then(serde_json::Value::as_str).unwrap_or_default();
        let Some(command_name) = self.set_conditions.get(code) else {
            return Reply::error(ReplyCode::SandflyError_, "unknown_condition");
        };
        let synthesized = Request::new(req.routing_key.clone(), command_name.clone(), RpcVerb::Cmd, req.payload.clone());
        info!(condition = code, command = %command_name, "dispatching set-condition");
        self.dispatch(&synthesized).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline_facade::PipelineFacade;
    use crate::run_controller::RunControllerHooks;
    use sandfly_domain::services::{EngineOutcome, MessageRelayer, NullRelayer, PipelineEngine};
    use serde_json::json;

    struct NoopEngine;

    #[async_trait]
    impl PipelineEngine for NoopEngine {
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

    fn make_receiver() -> Arc<RequestReceiver> {
        let facade = Arc::new(PipelineFacade::new(Arc::new(|_s: &str, _n: &str, _c: &serde_json::Value| {
            Err(SandflyError::config("no nodes registered in this fixture"))
        })));
        let engine: Arc<dyn PipelineEngine> = Arc::new(NoopEngine);
        let cancel = Arc::new(CancelSource::default());
        let relayer: Arc<dyn MessageRelayer> = Arc::new(NullRelayer);
        let controller = RunController::new(facade, engine, cancel.clone(), relayer, false, 1000, RunControllerHooks::default());
        Arc::new(RequestReceiver::new(controller, None, cancel, HashMap::new()))
    }

    #[tokio::test]
    async fn unknown_specifier_returns_invalid_method() {
        let receiver = make_receiver();
        let req = Request::new("k", "no-such-handler", RpcVerb::Get, json!({}));
        let reply = receiver.submit_request_message(&req).await;
        assert!(reply.is_error());
    }

    #[tokio::test]
    async fn registered_get_handler_is_invoked() {
        let receiver = make_receiver();
        receiver.register_get_handler("daq-status", Arc::new(|_req: Request| async move { Reply::ok(json!({"ok": true})) }));
        let req = Request::new("k", "daq-status", RpcVerb::Get, json!({}));
        let reply = receiver.submit_request_message(&req).await;
        assert!(!reply.is_error());
    }

    #[tokio::test]
    async fn unknown_set_condition_is_rejected() {
        let receiver = make_receiver();
        let req = Request::new("k", "set-condition", RpcVerb::Cmd, json!({"condition": "99"}));
        let reply = receiver.submit_request_message(&req).await;
        assert!(reply.is_error());
    }
}

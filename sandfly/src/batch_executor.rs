// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Batch Executor (C6)
//!
//! Runs a configured sequence of RPC-style actions at startup and on
//! demand (spec §4.6). Grounded on `original_source/library/control/
//! batch_executor.hh`'s `action_info{is_custom_action, request,
//! sleep_duration_ms}` and `clear_queue`/`add_to_queue`/`replace_queue`,
//! modeled here as an `Arc<Mutex<VecDeque<Action>>>` standing in for
//! `scarab::concurrent_queue`.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sandfly_bootstrap::shutdown::CancelSource;
use sandfly_domain::{Action, ActionOp, Reply, ReplyCode, Request, RpcVerb, RunState, SandflyError};
use serde_json::json;
use tracing::warn;

use crate::request_receiver::RequestReceiver;
use crate::run_controller::RunController;

const IDLE_POLL_MS: u64 = 100;

/// Multi-producer/single-consumer FIFO of pending actions (spec §3, §4.6).
#[derive(Default)]
pub struct BatchQueue {
    inner: Mutex<VecDeque<Action>>,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn add(&self, action: Action) {
        self.inner.lock().push_back(action);
    }

    pub fn add_many(&self, actions: Vec<Action>) {
        self.inner.lock().extend(actions);
    }

    /// `clear` followed by `add` (spec §9: "consider atomic replacement if
    /// callers expect no interleaving" — here the queue's own mutex makes
    /// clear+extend atomic with respect to `pop`).
    pub fn replace(&self, actions: Vec<Action>) {
        let mut inner = self.inner.lock();
        inner.clear();
        inner.extend(actions);
    }

    fn pop(&self) -> Option<Action> {
        self.inner.lock().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Drives one sequential pass (or a "run forever" pass) over a
/// [`BatchQueue`], injecting each action through the Request Receiver's
/// local dispatch path (spec §4.6).
pub struct BatchExecutor {
    queue: Arc<BatchQueue>,
    receiver: Arc<RequestReceiver>,
    controller: Arc<RunController>,
    cancel: Arc<CancelSource>,
    named_commands: HashMap<String, Vec<Action>>,
    run_forever: bool,
}

impl BatchExecutor {
    pub fn new(
        receiver: Arc<RequestReceiver>,
        controller: Arc<RunController>,
        cancel: Arc<CancelSource>,
        named_commands: HashMap<String, Vec<Action>>,
        run_forever: bool,
    ) -> Arc<Self> {
        Arc::new(Self { queue: Arc::new(BatchQueue::new()), receiver, controller, cancel, named_commands, run_forever })
    }

    pub fn queue(&self) -> Arc<BatchQueue> {
        self.queue.clone()
    }

    /// Parses a startup action array and enqueues it (spec §6's `on-startup`).
    pub fn enqueue_parsed(&self, specs: &[serde_json::Value]) -> Result<(), SandflyError> {
        let actions = specs.iter().map(Action::parse).collect::<Result<Vec<_>, _>>()?;
        self.queue.add_many(actions);
        Ok(())
    }

    fn queue_named(&self, name: &str) -> Result<(), SandflyError> {
        let actions = self.named_commands.get(name).ok_or_else(|| SandflyError::config(format!("unknown batch command '{name}'")))?;
        self.queue.add_many(actions.clone());
        Ok(())
    }

    /// Registers one `cmd` handler per named batch command so each can be
    /// triggered by RPC (spec §4.6).
    pub fn register_handlers(self: &Arc<Self>) {
        for name in self.named_commands.keys() {
            let this = self.clone();
            let name = name.clone();
            self.receiver.register_cmd_handler(
                name.clone(),
                Arc::new(move |_req: Request| {
                    let this = this.clone();
                    let name = name.clone();
                    async move {
                        match this.queue_named(&name) {
                            Ok(()) => Reply::ok(json!({})),
                            Err(err) => Reply::error(ReplyCode::SandflyError_, err.to_string()),
                        }
                    }
                }),
            );
        }
    }

    /// Waits on the same ready condition as the Request Receiver, then
    /// drains the queue: while not cancelled and (queue non-empty or
    /// `run_forever`), pop one action, inject it, wait, and stop on a
    /// fatal reply (spec §4.6 "Execution loop").
    pub async fn execute(&self) -> Result<(), SandflyError> {
        self.controller.wait_ready().await;
        let cancel_token = self.cancel.token();

        loop {
            if cancel_token.is_cancelled() {
                return Ok(());
            }

            let Some(action) = self.queue.pop() else {
                if !self.run_forever {
                    return Ok(());
                }
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(IDLE_POLL_MS)) => continue,
                    _ = cancel_token.cancelled() => return Ok(()),
                }
            };

            let reply = self.inject(&action).await;

            if action.is_custom_poll {
                self.poll_until_not_running(&action, &cancel_token).await;
            } else {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(action.sleep_after_ms)) => {}
                    _ = cancel_token.cancelled() => return Ok(()),
                }
            }

            if reply.return_code >= 100 {
                warn!(action = %action.routing_key, code = reply.return_code, "batch action failed, cancelling globally");
                self.cancel.cancel(1);
                return Err(SandflyError::protocol(format!("batch action '{}' returned code {}", action.routing_key, reply.return_code)));
            }
        }
    }

    async fn poll_until_not_running(&self, action: &Action, cancel_token: &sandfly_bootstrap::shutdown::CancellationToken) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(action.sleep_after_ms)) => {}
                _ = cancel_token.cancelled() => return,
            }
            let reply = self.inject(action).await;
            let status_value = reply.payload.get("server").and_then(|s| s.get("status-value")).and_then(serde_json::Value::as_u64);
            if status_value != Some(RunState::Running.to_u32() as u64) {
                return;
            }
        }
    }

    async fn inject(&self, action: &Action) -> Reply {
        let req = Request::new(action.routing_key.clone(), action.specifier.clone().unwrap_or_else(|| action.routing_key.clone()), map_op(action.op), action.payload.clone());
        self.receiver.submit_request_message(&req).await
    }
}

fn map_op(op: ActionOp) -> RpcVerb {
    match op {
        ActionOp::Get | ActionOp::WaitForStatusNotRunning => RpcVerb::Get,
        ActionOp::Set => RpcVerb::Set,
        ActionOp::Cmd => RpcVerb::Cmd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn replace_clears_before_adding() {
        let queue = BatchQueue::new();
        queue.add(Action::parse(&json!({"type": "cmd", "key": "a", "payload": {}})).unwrap());
        queue.replace(vec![Action::parse(&json!({"type": "cmd", "key": "b", "payload": {}})).unwrap()]);
        let popped = queue.pop().unwrap();
        assert_eq!(popped.routing_key, "b");
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_empties_queue() {
        let queue = BatchQueue::new();
        queue.add(Action::parse(&json!({"type": "cmd", "key": "a", "payload": {}})).unwrap());
        queue.clear();
        assert!(queue.is_empty());
    }
}

// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Run Controller (C4)
//!
//! Owns the state machine and, while activated, the pipeline [`Package`].
//! All state changes are serialized through [`RunController::transition`];
//! reads go through an atomic load of `status` (spec §4.4).
//!
//! ```text
//!   deactivated --activate()--> activating --(running-cb)--> activated
//!         |                         |
//!         |                         +-- build/lock failure: deactivated (warn) or error (fatal)
//!         |
//!         +-- deactivate() -- activated --> deactivating --(engine exits)--> deactivated
//!         |
//!         +-- start_run() -- activated --> running  (pipeline resume)
//!         |                                  |
//!         |                                  +-- duration elapsed / break -- activated (pipeline pause)
//!         |                                  +-- cancel -- canceled
//!         |
//!         +-- non-fatal node error  -- do_restart -- (auto-activate after 250ms)
//!         +-- fatal node error      -- error (final)
//!         +-- cancel() -- canceled (final within this component)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sandfly_bootstrap::shutdown::CancelSource;
use sandfly_domain::services::{EngineOutcome, MessageRelayer, PipelineEngine};
use sandfly_domain::{Reply, ReplyCode, Request, RunState, SandflyError};
use serde_json::{json, Value};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::pipeline_facade::{Package, PipelineFacade};

const SUB_DURATION_MS: u64 = 500;
const DO_RESTART_DELAY_MS: u64 = 250;

/// Optional override points, analogous to the original's virtual hooks
/// (spec §9: "Model as an interface of optional hooks ... keep the state
/// machine concrete"). All default to no-ops.
#[derive(Default)]
pub struct RunControllerHooks {
    pub on_initialize: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_activate: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_deactivate: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_pre_run: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_post_run: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_pre_midge_run: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_post_midge_run: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_done: Option<Box<dyn Fn() + Send + Sync>>,
    pub on_error: Option<Box<dyn Fn(&SandflyError) + Send + Sync>>,
}

pub struct RunController {
    status: AtomicU32,
    transition: AsyncMutex<()>,
    facade: Arc<PipelineFacade>,
    engine: Arc<dyn PipelineEngine>,
    package: AsyncMutex<Option<Package>>,
    cancel: Arc<CancelSource>,
    relayer: Arc<dyn MessageRelayer>,
    ready: Notify,
    ready_fired: AtomicBool,
    done: Notify,
    run_stopper: Notify,
    do_break_run: AtomicBool,
    activate_at_startup: bool,
    default_duration_ms: AtomicU64,
    hooks: RunControllerHooks,
}

impl RunController {
    pub fn new(
        facade: Arc<PipelineFacade>,
        engine: Arc<dyn PipelineEngine>,
        cancel: Arc<CancelSource>,
        relayer: Arc<dyn MessageRelayer>,
        activate_at_startup: bool,
        default_duration_ms: u64,
        hooks: RunControllerHooks,
    ) -> Arc<Self> {
        Arc::new(Self {
            status: AtomicU32::new(RunState::Deactivated.to_u32()),
            transition: AsyncMutex::new(()),
            facade,
            engine,
            package: AsyncMutex::new(None),
            cancel,
            relayer,
            ready: Notify::new(),
            ready_fired: AtomicBool::new(false),
            done: Notify::new(),
            run_stopper: Notify::new(),
            do_break_run: AtomicBool::new(false),
            activate_at_startup,
            default_duration_ms: AtomicU64::new(default_duration_ms),
            hooks,
        })
    }

    pub fn status(&self) -> RunState {
        RunState::from_u32(self.status.load(Ordering::SeqCst)).unwrap_or(RunState::Error)
    }

    fn set_status(&self, state: RunState) {
        self.status.store(state.to_u32(), Ordering::SeqCst);
    }

    /// Spec §4.4 "Readiness probe".
    pub fn is_ready_at_startup(&self) -> bool {
        if self.activate_at_startup {
            self.status() == RunState::Activated
        } else {
            matches!(self.status(), RunState::Activated | RunState::Deactivated)
        }
    }

    /// Resolves once the pipeline's running-callback has fired at least
    /// once. C5/C6 block on this during startup (spec §5).
    pub async fn wait_ready(&self) {
        if self.ready_fired.load(Ordering::SeqCst) {
            return;
        }
        self.ready.notified().await;
    }

    fn signal_ready(&self) {
        self.ready_fired.store(true, Ordering::SeqCst);
        self.ready.notify_waiters();
    }

    async fn wait_for_status(&self, target: RunState) {
        loop {
            if self.status() == target {
                return;
            }
            self.done.notified().await;
        }
    }

    pub async fn initialize(self: &Arc<Self>) -> Result<(), SandflyError> {
        if let Some(hook) = &self.hooks.on_initialize {
            hook();
        }
        if self.activate_at_startup {
            self.activate().await?;
        }
        Ok(())
    }

    /// `deactivated | do_restart -> activating -> activated`.
    pub async fn activate(self: &Arc<Self>) -> Result<(), SandflyError> {
        let _guard = self.transition.lock().await;
        let current = self.status();
        if !matches!(current, RunState::Deactivated | RunState::DoRestart) {
            return Err(SandflyError::state(current.interpret(), "activate"));
        }
        self.set_status(RunState::Activating);

        let package = self.facade.acquire().await?;
        let run_string = package.run_string.clone();
        *self.package.lock().await = Some(package);

        let running = Arc::new(Notify::new());
        let running_cb = running.clone();
        let on_running: Box<dyn FnOnce() + Send> = Box::new(move || running_cb.notify_waiters());

        let engine = self.engine.clone();
        let mut handle: JoinHandle<Result<EngineOutcome, SandflyError>> = tokio::spawn(async move { engine.run(&run_string, on_running).await });

        tokio::select! {
            _ = running.notified() => {
                self.set_status(RunState::Activated);
                if let Some(hook) = &self.hooks.on_activate {
                    hook();
                }
                self.signal_ready();
                self.relayer.post_status(RunState::Activated).await;
                self.spawn_exit_watcher(handle);
                Ok(())
            }
            joined = &mut handle => {
                let pkg = self.package.lock().await.take();
                if let Some(pkg) = pkg {
                    self.facade.release(pkg).await;
                }
                match joined {
                    Err(join_err) => {
                        self.set_status(RunState::Error);
                        self.cancel.cancel(1);
                        Err(SandflyError::resource(format!("engine task panicked: {join_err}")))
                    }
                    Ok(outcome) => self.classify_activation_failure(outcome),
                }
            }
        }
    }

    /// The engine exited before ever signalling "running" — the graph
    /// failed to build or lock. Non-fatal outcomes warn and return to
    /// `deactivated`; fatal ones escalate to `error` + global cancel.
    fn classify_activation_failure(&self, outcome: Result<EngineOutcome, SandflyError>) -> Result<(), SandflyError> {
        match outcome {
            Ok(_) => {
                self.set_status(RunState::Deactivated);
                warn!("pipeline exited before reaching running state");
                Ok(())
            }
            Err(err) if err.is_fatal() => {
                self.set_status(RunState::Error);
                self.cancel.cancel(1);
                Err(err)
            }
            Err(err) => {
                self.set_status(RunState::Deactivated);
                warn!(error = %err, "pipeline failed to activate");
                Ok(())
            }
        }
    }

    /// `activated -> deactivating -> (engine exits) -> deactivated`.
    pub async fn deactivate(self: &Arc<Self>) -> Result<(), SandflyError> {
        let _guard = self.transition.lock().await;
        let current = self.status();
        if current != RunState::Activated {
            return Err(SandflyError::state(current.interpret(), "deactivate"));
        }
        self.set_status(RunState::Deactivating);
        if let Some(hook) = &self.hooks.on_deactivate {
            hook();
        }
        self.engine.cancel().await
    }

    /// `deactivate()` then `activate()`, waiting for the watcher to land
    /// on `deactivated` in between.
    pub async fn reactivate(self: &Arc<Self>) -> Result<(), SandflyError> {
        self.deactivate().await?;
        self.wait_for_status(RunState::Deactivated).await;
        self.activate().await
    }

    /// Spawns a task that owns the engine's run-to-completion future and
    /// performs the engine error mapping once it resolves (spec §4.4).
    fn spawn_exit_watcher(self: &Arc<Self>, handle: JoinHandle<Result<EngineOutcome, SandflyError>>) {
        let this = self.clone();
        tokio::spawn(async move {
            let joined = handle.await;
            this.on_engine_exit(joined).await;
        });
    }

    async fn on_engine_exit(self: &Arc<Self>, joined: Result<Result<EngineOutcome, SandflyError>, tokio::task::JoinError>) {
        let pkg = self.package.lock().await.take();
        if let Some(pkg) = pkg {
            self.facade.release(pkg).await;
        }
        if let Some(hook) = &self.hooks.on_post_midge_run {
            hook();
        }

        match joined {
            Err(join_err) => {
                self.set_status(RunState::Error);
                self.relayer.post_warning(&format!("engine task panicked: {join_err}")).await;
                self.cancel.cancel(1);
            }
            Ok(Ok(EngineOutcome::Normal)) => {
                self.set_status(RunState::Deactivated);
                if let Some(hook) = &self.hooks.on_done {
                    hook();
                }
            }
            Ok(Ok(EngineOutcome::NodeNonFatal(msg))) | Ok(Err(SandflyError::EngineNonFatal(msg))) => {
                self.set_status(RunState::DoRestart);
                self.relayer.post_warning(&msg).await;
                self.schedule_auto_reactivate();
            }
            Ok(Ok(EngineOutcome::NodeFatal(msg))) | Ok(Err(SandflyError::EngineFatal(msg))) => {
                let err = SandflyError::EngineFatal(msg.clone());
                self.set_status(RunState::Error);
                if let Some(hook) = &self.hooks.on_error {
                    hook(&err);
                }
                self.relayer.post_warning(&msg).await;
                self.cancel.cancel(1);
            }
            Ok(Err(other)) => {
                self.set_status(RunState::Error);
                if let Some(hook) = &self.hooks.on_error {
                    hook(&other);
                }
                self.relayer.post_warning(&other.to_string()).await;
                self.cancel.cancel(1);
            }
        }
        self.done.notify_waiters();
    }

    fn schedule_auto_reactivate(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(DO_RESTART_DELAY_MS)).await;
            if let Err(err) = this.activate().await {
                warn!(error = %err, "auto-reactivate after do_restart failed");
            }
        });
    }

    /// `activated -> running` (pipeline resume); spawns the bounded run loop.
    pub async fn start_run(self: &Arc<Self>, duration_ms: Option<u64>) -> Result<(), SandflyError> {
        let _guard = self.transition.lock().await;
        let current = self.status();
        if current != RunState::Activated {
            return Err(SandflyError::state(current.interpret(), "start-run"));
        }
        self.set_status(RunState::Running);
        self.do_break_run.store(false, Ordering::SeqCst);
        self.engine.resume().await?;
        if let Some(hook) = &self.hooks.on_pre_run {
            hook();
        }

        let duration = duration_ms.unwrap_or_else(|| self.default_duration_ms.load(Ordering::SeqCst));
        let this = self.clone();
        tokio::spawn(async move { this.do_run(duration).await });
        Ok(())
    }

    /// Duration split into 500 ms sub-durations so the cancel flag and a
    /// manual `stop_run` are observed promptly (spec §4.4 "Run loop").
    async fn do_run(self: Arc<Self>, duration_ms: u64) {
        let cancel_token = self.cancel.token();

        if duration_ms == 0 {
            tokio::select! {
                _ = self.run_stopper.notified() => {}
                _ = cancel_token.cancelled() => {}
            }
        } else {
            let deadline = tokio::time::Instant::now() + Duration::from_millis(duration_ms);
            loop {
                if self.do_break_run.load(Ordering::SeqCst) || cancel_token.is_cancelled() {
                    break;
                }
                let now = tokio::time::Instant::now();
                if now >= deadline {
                    break;
                }
                let tick = (deadline - now).min(Duration::from_millis(SUB_DURATION_MS));
                tokio::select! {
                    _ = tokio::time::sleep(tick) => {}
                    _ = self.run_stopper.notified() => break,
                    _ = cancel_token.cancelled() => break,
                }
            }
        }

        if let Err(err) = self.engine.pause().await {
            warn!(error = %err, "pause after run failed");
        }
        if let Some(hook) = &self.hooks.on_post_run {
            hook();
        }
        if self.status() == RunState::Running {
            self.set_status(RunState::Activated);
        }
    }

    /// `running -> activated` on the next sub-duration tick.
    pub fn stop_run(&self) -> Result<(), SandflyError> {
        if self.status() != RunState::Running {
            return Err(SandflyError::state(self.status().interpret(), "stop-run"));
        }
        self.do_break_run.store(true, Ordering::SeqCst);
        self.run_stopper.notify_waiters();
        Ok(())
    }

    /// Stops any run in progress, cancels the engine Package if held, and
    /// sets the terminal `canceled` status (spec §4.4 "Cancellation").
    pub async fn cancel(&self, code: i32) {
        let _ = self.stop_run();
        if self.status() == RunState::Activated || self.status() == RunState::Running {
            let _ = self.engine.cancel().await;
        }
        self.set_status(RunState::Canceled);
        self.cancel.cancel(code);
    }

    // ---- RPC handlers (spec §4.4's handler table) ----

    pub async fn handle_activate_run_control(self: &Arc<Self>, _req: &Request) -> Reply {
        match self.activate().await {
            Ok(()) => Reply::ok(json!({})),
            Err(err) => reply_for_error(&err),
        }
    }

    pub async fn handle_reactivate_run_control(self: &Arc<Self>, _req: &Request) -> Reply {
        match self.reactivate().await {
            Ok(()) => Reply::ok(json!({})),
            Err(err) => reply_for_error(&err),
        }
    }

    pub async fn handle_deactivate_run_control(self: &Arc<Self>, _req: &Request) -> Reply {
        match self.deactivate().await {
            Ok(()) => Reply::ok(json!({})),
            Err(err) => reply_for_error(&err),
        }
    }

    pub async fn handle_start_run_request(self: &Arc<Self>, req: &Request) -> Reply {
        let duration = req.payload.get("duration-ms").and_then(Value::as_u64);
        match self.start_run(duration).await {
            Ok(()) => Reply::ok(json!({})),
            Err(err) => reply_for_error(&err),
        }
    }

    pub async fn handle_stop_run_request(&self, _req: &Request) -> Reply {
        match self.stop_run() {
            Ok(()) => Reply::ok(json!({})),
            Err(err) => reply_for_error(&err),
        }
    }

    /// `run-daq-cmd.<stream>.<node>.<cmd>`.
    pub async fn handle_run_command_request(&self, req: &Request) -> Reply {
        let segments = req.specifier_segments();
        let [_prefix, stream, node, cmd] = match <[&str; 4]>::try_from(segments) {
            Ok(parts) => parts,
            Err(_) => return Reply::error(ReplyCode::SandflyError_, "invalid_specifier"),
        };
        match self.facade.run_command(stream, node, cmd, &req.payload).await {
            Ok(true) => Reply::ok(json!({})),
            Ok(false) => Reply::error(ReplyCode::SandflyError_, "invalid_method"),
            Err(err) => reply_for_error(&err),
        }
    }

    /// `active-config.<stream>.<node>[.<param>]`.
    pub async fn handle_apply_config_request(&self, req: &Request) -> Reply {
        let segments = req.specifier_segments();
        if segments.len() < 3 {
            return Reply::error(ReplyCode::SandflyError_, "invalid_specifier");
        }
        let (stream, node, param) = (segments[1], segments[2], segments.get(3).copied());

        let config = match param {
            Some(param) => {
                let value = req.payload.get("values").and_then(|v| v.get(0)).cloned().unwrap_or(Value::Null);
                json!({ param: value })
            }
            None => req.payload.clone(),
        };

        match self.facade.configure_node(stream, node, &config).await {
            Ok(()) => Reply::ok(json!({})),
            Err(err) => reply_for_error(&err),
        }
    }

    pub async fn handle_dump_config_request(&self, req: &Request) -> Reply {
        let segments = req.specifier_segments();
        if segments.len() < 3 {
            return Reply::error(ReplyCode::SandflyError_, "invalid_specifier");
        }
        let (stream, node) = (segments[1], segments[2]);
        match self.facade.dump_node_config(stream, node).await {
            Ok(config) => Reply::ok(config),
            Err(err) => reply_for_error(&err),
        }
    }

    pub async fn handle_get_status_request(&self, _req: &Request) -> Reply {
        let status = self.status();
        Reply::ok(json!({ "server": { "status": status.interpret(), "status-value": status.to_u32() } }))
    }

    pub async fn handle_get_duration_request(&self, _req: &Request) -> Reply {
        Reply::ok(json!({ "duration": self.default_duration_ms.load(Ordering::SeqCst) }))
    }

    pub async fn handle_set_duration_request(&self, req: &Request) -> Reply {
        match req.payload.get("duration").and_then(Value::as_u64) {
            Some(0) | None => Reply::error(ReplyCode::SandflyError_, "invalid_duration"),
            Some(duration) => {
                self.default_duration_ms.store(duration, Ordering::SeqCst);
                Reply::ok(json!({}))
            }
        }
    }
}

fn reply_for_error(err: &SandflyError) -> Reply {
    if err.is_fatal() {
        Reply::error(ReplyCode::SandflyRunning, err.to_string())
    } else {
        Reply::error(ReplyCode::SandflyError_, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sandfly_domain::services::NullRelayer;
    use std::sync::atomic::AtomicUsize;

    struct InstantEngine {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl PipelineEngine for InstantEngine {
        async fn run(&self, _run_string: &str, on_running: Box<dyn FnOnce() + Send>) -> Result<EngineOutcome, SandflyError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            on_running();
            // Stays "running" until cancelled by the test.
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

    fn make_controller() -> (Arc<RunController>, Arc<PipelineFacade>) {
        let facade = Arc::new(PipelineFacade::new(Arc::new(|_s: &str, _n: &str, _c: &Value| {
            Err(SandflyError::config("no nodes registered in this fixture"))
        })));
        let engine: Arc<dyn PipelineEngine> = Arc::new(InstantEngine { runs: AtomicUsize::new(0) });
        let cancel = Arc::new(CancelSource::default());
        let relayer: Arc<dyn MessageRelayer> = Arc::new(NullRelayer);
        let controller = RunController::new(facade.clone(), engine, cancel, relayer, false, 1000, RunControllerHooks::default());
        (controller, facade)
    }

    #[tokio::test]
    async fn starts_deactivated_and_rejects_premature_deactivate() {
        let (controller, _facade) = make_controller();
        assert_eq!(controller.status(), RunState::Deactivated);
        assert!(controller.deactivate().await.is_err());
    }

    #[tokio::test]
    async fn activate_without_streams_fails_closed() {
        let (controller, _facade) = make_controller();
        assert!(controller.activate().await.is_err());
        assert_eq!(controller.status(), RunState::Deactivated);
    }

    #[tokio::test]
    async fn stop_run_requires_running_status() {
        let (controller, _facade) = make_controller();
        assert!(controller.stop_run().is_err());
    }
}

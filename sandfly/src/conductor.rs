// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Conductor (C7)
//!
//! Top-level lifecycle: builds C2–C6 in dependency order, wires the
//! handler registry, starts the long-lived tasks, and joins them on
//! shutdown (spec §4.7).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use sandfly_bootstrap::shutdown::CancelSource;
use sandfly_domain::config::SandflyConfig;
use sandfly_domain::services::{MessageRelayer, PipelineEngine, Transport};
use sandfly_domain::{Action, ConductorStatus, Reply, ReplyCode, Request, SandflyError};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::batch_executor::BatchExecutor;
use crate::control_access::ControlAccess;
use crate::file_rotator::{ContainerFactory, RotatorHouse};
use crate::pipeline_facade::{NodeBuilder, PipelineFacade, StreamTemplate};
use crate::request_receiver::RequestReceiver;
use crate::run_controller::{RunController, RunControllerHooks};

/// Everything the Conductor needs that comes from outside the
/// control-plane core: the pipeline engine, the node builder, the wire
/// transport, the record container factory, and the optional relayer.
pub struct ConductorDeps {
    pub engine: Arc<dyn PipelineEngine>,
    pub node_builder: NodeBuilder,
    pub transport: Option<Arc<dyn Transport>>,
    pub container_factory: ContainerFactory,
    pub relayer: Arc<dyn MessageRelayer>,
}

pub struct Conductor {
    status: RwLock<ConductorStatus>,
    control_access: Arc<ControlAccess>,
    facade: Arc<PipelineFacade>,
    controller: Arc<RunController>,
    receiver: Arc<RequestReceiver>,
    startup_batch: Arc<BatchExecutor>,
    forever_batch: Arc<BatchExecutor>,
    rotator_house: Arc<RotatorHouse>,
    cancel: Arc<CancelSource>,
}

impl Conductor {
    pub async fn new(config: SandflyConfig, deps: ConductorDeps, cancel: Arc<CancelSource>) -> Result<Arc<Self>, SandflyError> {
        let facade = Arc::new(PipelineFacade::new(deps.node_builder));
        for (name, raw) in &config.streams {
            facade.add_stream(name, parse_stream_template(raw)?).await?;
        }

        let controller = RunController::new(
            facade.clone(),
            deps.engine,
            cancel.clone(),
            deps.relayer,
            config.daq.activate_at_startup,
            config.daq.duration,
            RunControllerHooks::default(),
        );

        let control_access = Arc::new(ControlAccess::new());
        control_access.set(Arc::downgrade(&controller));

        let receiver = Arc::new(RequestReceiver::new(controller.clone(), deps.transport, cancel.clone(), config.set_conditions.clone()));

        let named_commands = config
            .batch_commands
            .iter()
            .map(|(name, specs)| {
                let actions = specs.iter().map(Action::parse).collect::<Result<Vec<_>, _>>()?;
                Ok((name.clone(), actions))
            })
            .collect::<Result<HashMap<String, Vec<Action>>, SandflyError>>()?;

        let startup_batch = BatchExecutor::new(receiver.clone(), controller.clone(), cancel.clone(), HashMap::new(), false);
        startup_batch.enqueue_parsed(&config.on_startup)?;

        let forever_batch = BatchExecutor::new(receiver.clone(), controller.clone(), cancel.clone(), named_commands, true);
        forever_batch.register_handlers();

        let rotator_house = Arc::new(RotatorHouse::new(config.daq.n_files, config.daq.max_file_size_mb, deps.container_factory, cancel.clone()));

        let conductor = Arc::new(Self {
            status: RwLock::new(ConductorStatus::Initialized),
            control_access,
            facade,
            controller,
            receiver,
            startup_batch,
            forever_batch,
            rotator_house,
            cancel,
        });
        conductor.register_handlers();
        Ok(conductor)
    }

    pub fn status(&self) -> ConductorStatus {
        *self.status.read()
    }

    fn set_status(&self, status: ConductorStatus) {
        *self.status.write() = status;
    }

    pub fn control_access(&self) -> Arc<ControlAccess> {
        self.control_access.clone()
    }

    /// Registers the Run Controller's RPC handlers plus the Conductor's own
    /// cross-wiring handlers (stream list, node list, add/remove stream,
    /// quit) (spec §4.4's handler table, §4.7).
    fn register_handlers(self: &Arc<Self>) {
        let controller = self.controller.clone();
        self.receiver.register_cmd_handler("start-run", handler(move |req| {
            let controller = controller.clone();
            async move { controller.handle_start_run_request(&req).await }
        }));

        let controller = self.controller.clone();
        self.receiver.set_run_handler(handler(move |req| {
            let controller = controller.clone();
            async move { controller.handle_start_run_request(&req).await }
        }));

        let controller = self.controller.clone();
        self.receiver.register_cmd_handler("stop-run", handler(move |req| {
            let controller = controller.clone();
            async move { controller.handle_stop_run_request(&req).await }
        }));

        let controller = self.controller.clone();
        self.receiver.register_cmd_handler("activate-daq", handler(move |req| {
            let controller = controller.clone();
            async move { controller.handle_activate_run_control(&req).await }
        }));

        let controller = self.controller.clone();
        self.receiver.register_cmd_handler("reactivate-daq", handler(move |req| {
            let controller = controller.clone();
            async move { controller.handle_reactivate_run_control(&req).await }
        }));

        let controller = self.controller.clone();
        self.receiver.register_cmd_handler("deactivate-daq", handler(move |req| {
            let controller = controller.clone();
            async move { controller.handle_deactivate_run_control(&req).await }
        }));

        let controller = self.controller.clone();
        self.receiver.register_cmd_handler("run-daq-cmd", handler(move |req| {
            let controller = controller.clone();
            async move { controller.handle_run_command_request(&req).await }
        }));

        let controller = self.controller.clone();
        self.receiver.register_get_handler("active-config", handler(move |req| {
            let controller = controller.clone();
            async move { controller.handle_dump_config_request(&req).await }
        }));

        let controller = self.controller.clone();
        self.receiver.register_set_handler("active-config", handler(move |req| {
            let controller = controller.clone();
            async move { controller.handle_apply_config_request(&req).await }
        }));

        let controller = self.controller.clone();
        self.receiver.register_get_handler("daq-status", handler(move |req| {
            let controller = controller.clone();
            async move { controller.handle_get_status_request(&req).await }
        }));

        let controller = self.controller.clone();
        self.receiver.register_get_handler("duration", handler(move |req| {
            let controller = controller.clone();
            async move { controller.handle_get_duration_request(&req).await }
        }));

        let controller = self.controller.clone();
        self.receiver.register_set_handler("duration", handler(move |req| {
            let controller = controller.clone();
            async move { controller.handle_set_duration_request(&req).await }
        }));

        let facade = self.facade.clone();
        self.receiver.register_get_handler("list-streams", handler(move |_req| {
            let facade = facade.clone();
            async move { Reply::ok(json!({ "streams": facade.stream_names().await })) }
        }));

        let facade = self.facade.clone();
        self.receiver.register_get_handler("list-nodes", handler(move |_req| {
            let facade = facade.clone();
            async move { Reply::ok(json!({ "nodes": facade.node_names().await })) }
        }));

        let facade = self.facade.clone();
        self.receiver.register_cmd_handler("add-stream", handler(move |req| {
            let facade = facade.clone();
            async move { handle_add_stream(&facade, &req).await }
        }));

        let facade = self.facade.clone();
        self.receiver.register_cmd_handler("remove-stream", handler(move |req| {
            let facade = facade.clone();
            async move {
                match req.payload.get("name").and_then(Value::as_str) {
                    Some(name) => match facade.remove_stream(name).await {
                        Ok(()) => Reply::ok(json!({})),
                        Err(err) => Reply::error(ReplyCode::SandflyError_, err.to_string()),
                    },
                    None => Reply::error(ReplyCode::SandflyError_, "invalid_specifier"),
                }
            }
        }));

        let cancel = self.cancel.clone();
        self.receiver.register_cmd_handler("quit", handler(move |_req| {
            let cancel = cancel.clone();
            async move {
                cancel.cancel(0);
                Reply::ok(json!({}))
            }
        }));
    }

    /// Runs the on-startup batch to completion, then starts the Request
    /// Receiver and the "run forever" Batch Executor concurrently, and
    /// blocks until a process-wide cancel is observed (spec §4.7, §5).
    pub async fn run(self: Arc<Self>) -> i32 {
        self.set_status(ConductorStatus::Starting);

        if let Err(err) = self.controller.initialize().await {
            error!(error = %err, "controller failed to initialize");
            self.cancel.cancel(1);
        }

        if let Err(err) = self.startup_batch.execute().await {
            warn!(error = %err, "on-startup batch failed");
        }

        self.set_status(ConductorStatus::Running);

        let receiver = self.receiver.clone();
        let receiver_handle = tokio::spawn(async move { receiver.execute().await });

        let forever = self.forever_batch.clone();
        let forever_handle = tokio::spawn(async move { forever.execute().await });

        self.cancel.token().cancelled().await;
        info!("conductor observed cancel, unwinding");

        if let Err(err) = receiver_handle.await {
            warn!(error = %err, "request receiver task panicked");
        }
        if let Err(err) = forever_handle.await {
            warn!(error = %err, "batch executor task panicked");
        }
        if let Err(err) = self.rotator_house.finish_all().await {
            warn!(error = %err, "file rotator teardown failed");
        }

        self.cancel.complete();
        let code = self.cancel.return_code();
        self.set_status(if code == 0 { ConductorStatus::Done } else { ConductorStatus::Error });
        code
    }
}

fn handler<F, Fut>(f: F) -> Arc<dyn crate::request_receiver::Handler>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Reply> + Send + 'static,
{
    Arc::new(f)
}

async fn handle_add_stream(facade: &PipelineFacade, req: &Request) -> Reply {
    let Some(name) = req.payload.get("name").and_then(Value::as_str) else {
        return Reply::error(ReplyCode::SandflyError_, "invalid_specifier");
    };
    let stream_cfg = req.payload.get("stream").unwrap_or(&req.payload);
    let template = match parse_stream_template(stream_cfg) {
        Ok(template) => template,
        Err(err) => return Reply::error(ReplyCode::SandflyError_, err.to_string()),
    };
    match facade.add_stream(name, template).await {
        Ok(()) => Reply::ok(json!({})),
        Err(err) => Reply::error(ReplyCode::SandflyError_, err.to_string()),
    }
}

/// Expands one `streams.<name>` config entry into a [`StreamTemplate`]:
/// `device` becomes shared device config, `connections` becomes the
/// textual join list, and every remaining key is a node builder config
/// (spec §4.3, §6).
fn parse_stream_template(value: &Value) -> Result<StreamTemplate, SandflyError> {
    let obj = value.as_object().ok_or_else(|| SandflyError::config("stream config must be an object"))?;
    let device_config = obj.get("device").cloned().unwrap_or_else(|| json!({}));
    let connections = obj
        .get("connections")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default();
    let nodes = obj
        .iter()
        .filter(|(k, _)| k.as_str() != "device" && k.as_str() != "connections" && k.as_str() != "preset")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Ok(StreamTemplate { nodes, connections, device_config })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sandfly_domain::services::{EngineOutcome, NullRelayer};

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

    fn deps() -> ConductorDeps {
        ConductorDeps {
            engine: Arc::new(NoopEngine),
            node_builder: Arc::new(|_s: &str, _n: &str, _c: &Value| Err(SandflyError::config("no node types registered in this fixture"))),
            transport: None,
            container_factory: Arc::new(|_name: &str| panic!("no container factory configured in this fixture")),
            relayer: Arc::new(NullRelayer),
        }
    }

    #[tokio::test]
    async fn builds_with_empty_config() {
        let cancel = Arc::new(CancelSource::default());
        let conductor = Conductor::new(SandflyConfig::default(), deps(), cancel).await.unwrap();
        assert_eq!(conductor.status(), ConductorStatus::Initialized);
    }

    #[tokio::test]
    async fn quit_handler_triggers_cancel() {
        let cancel = Arc::new(CancelSource::default());
        let conductor = Conductor::new(SandflyConfig::default(), deps(), cancel.clone()).await.unwrap();
        let reply = conductor.receiver.submit_request_message(&Request::new("k", "quit", sandfly_domain::RpcVerb::Cmd, json!({}))).await;
        assert!(!reply.is_error());
        assert!(cancel.token().is_cancelled());
    }
}

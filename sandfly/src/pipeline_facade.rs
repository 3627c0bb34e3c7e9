// /////////////////////////////////////////////////////////////////////////////
// Sandfly
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Pipeline Facade (C3)
//!
//! Holds a map `name -> stream template` and the live node-binding registry
//! built from it. At most one holder may have the exclusive [`Package`]
//! borrow at a time; ownership returns to the facade on [`PipelineFacade::release`]
//! (spec §3 "Pipeline Package", §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use sandfly_domain::services::NodeBinding;
use sandfly_domain::SandflyError;
use serde_json::Value;
use tokio::sync::Mutex;

/// Builds one live [`NodeBinding`] for a `(stream, node, config)` triple.
/// Supplied once at facade construction; stands in for the per-preset
/// builder functions the original dispatches through.
pub type NodeBuilder = Arc<dyn Fn(&str, &str, &Value) -> Result<Box<dyn NodeBinding>, SandflyError> + Send + Sync>;

/// A named preset expanded into per-node builders and textual connections.
#[derive(Debug, Clone)]
pub struct StreamTemplate {
    /// node name -> builder config
    pub nodes: HashMap<String, Value>,
    pub connections: Vec<String>,
    pub device_config: Value,
}

/// Exclusive borrow of the built pipeline graph (spec §3 "Pipeline Package").
/// Ownership returns to the facade on `release`.
pub struct Package {
    pub run_string: String,
}

struct Inner {
    streams: HashMap<String, StreamTemplate>,
    bindings: HashMap<String, Box<dyn NodeBinding>>,
    must_reset: bool,
    held: bool,
}

/// Locked handle to a built pipeline graph plus its node bindings. Held
/// behind a `tokio::sync::Mutex` since node commands (`run_command`) are
/// themselves async.
pub struct PipelineFacade {
    build_node: NodeBuilder,
    inner: Mutex<Inner>,
}

impl PipelineFacade {
    pub fn new(build_node: NodeBuilder) -> Self {
        Self { build_node, inner: Mutex::new(Inner { streams: HashMap::new(), bindings: HashMap::new(), must_reset: false, held: false }) }
    }

    /// Expands a stream preset, renames each node `"<stream>_<node>"`,
    /// applies per-node config plus shared device config, rejects
    /// duplicate stream names, and marks the graph for rebuild.
    pub async fn add_stream(&self, name: &str, mut template: StreamTemplate) -> Result<(), SandflyError> {
        let mut inner = self.inner.lock().await;
        if inner.streams.contains_key(name) {
            return Err(SandflyError::config(format!("stream '{name}' already exists")));
        }
        for node_cfg in template.nodes.values_mut() {
            merge_device_config(node_cfg, &template.device_config);
        }
        inner.streams.insert(name.to_string(), template);
        inner.must_reset = true;
        Ok(())
    }

    pub async fn remove_stream(&self, name: &str) -> Result<(), SandflyError> {
        let mut inner = self.inner.lock().await;
        if inner.streams.remove(name).is_none() {
            return Err(SandflyError::config(format!("unknown stream '{name}'")));
        }
        inner.must_reset = true;
        Ok(())
    }

    pub async fn configure_node(&self, stream: &str, node: &str, config: &Value) -> Result<(), SandflyError> {
        let key = keyed_name(stream, node);
        let mut inner = self.inner.lock().await;
        let binding = inner
            .bindings
            .get_mut(&key)
            .ok_or_else(|| SandflyError::config(format!("unknown node '{key}'")))?;
        binding.apply_config(config)
    }

    pub async fn dump_node_config(&self, stream: &str, node: &str) -> Result<Value, SandflyError> {
        let key = keyed_name(stream, node);
        let inner = self.inner.lock().await;
        let binding = inner.bindings.get(&key).ok_or_else(|| SandflyError::config(format!("unknown node '{key}'")))?;
        Ok(binding.dump_config())
    }

    /// Runs a named command against a live node. Unknown commands return
    /// `Ok(false)` rather than an error (spec §4.3).
    pub async fn run_command(&self, stream: &str, node: &str, cmd: &str, args: &Value) -> Result<bool, SandflyError> {
        let key = keyed_name(stream, node);
        let inner = self.inner.lock().await;
        let binding = inner.bindings.get(&key).ok_or_else(|| SandflyError::config(format!("unknown node '{key}'")))?;
        binding.run_command(cmd, args).await
    }

    /// Rebuilds the pipeline graph from the current stream templates.
    pub async fn reset_pipeline(&self) -> Result<(), SandflyError> {
        let mut inner = self.inner.lock().await;
        if inner.streams.is_empty() {
            return Err(SandflyError::config("empty_pipeline"));
        }

        let mut bindings = HashMap::new();
        for (stream_name, template) in inner.streams.iter() {
            for (node_name, node_cfg) in template.nodes.iter() {
                let key = keyed_name(stream_name, node_name);
                let binding = (self.build_node)(stream_name, node_name, node_cfg)?;
                bindings.insert(key, binding);
            }
            for conn in &template.connections {
                // Connections are textual joins between keyed node names;
                // validated here against the freshly built binding set.
                if !conn.split("->").all(|part| bindings.contains_key(part.trim())) {
                    return Err(SandflyError::config(format!("dangling connection '{conn}' in stream '{stream_name}'")));
                }
            }
        }

        inner.bindings = bindings;
        inner.must_reset = false;
        Ok(())
    }

    /// Hands out the exclusive [`Package`] borrow, resetting the graph
    /// first if `must_reset` is set.
    pub async fn acquire(&self) -> Result<Package, SandflyError> {
        {
            let inner = self.inner.lock().await;
            if inner.held {
                return Err(SandflyError::resource("pipeline package already held"));
            }
        }

        let needs_reset = self.inner.lock().await.must_reset;
        if needs_reset {
            self.reset_pipeline().await?;
        }

        let mut inner = self.inner.lock().await;
        inner.held = true;
        Ok(Package { run_string: self.run_string_locked(&inner) })
    }

    /// Returns ownership to the facade; the next acquisition will rebuild.
    pub async fn release(&self, _package: Package) {
        let mut inner = self.inner.lock().await;
        inner.held = false;
        inner.must_reset = true;
    }

    pub async fn stream_names(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner.streams.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn node_names(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner.bindings.keys().cloned().collect();
        names.sort();
        names
    }

    /// Terminator-separated `"<stream>_<node>"` list for the engine's runner.
    pub async fn run_string(&self) -> String {
        let inner = self.inner.lock().await;
        self.run_string_locked(&inner)
    }

    fn run_string_locked(&self, inner: &Inner) -> String {
        let mut keys: Vec<&String> = inner.bindings.keys().collect();
        keys.sort();
        keys.into_iter().cloned().collect::<Vec<_>>().join(";")
    }
}

fn keyed_name(stream: &str, node: &str) -> String {
    format!("{stream}_{node}")
}

fn merge_device_config(node_cfg: &mut Value, device_cfg: &Value) {
    if let (Value::Object(node_map), Value::Object(device_map)) = (node_cfg, device_cfg) {
        for (k, v) in device_map {
            node_map.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}

/// Shared type alias used by callers that need an owned facade handle.
pub type SharedPipelineFacade = Arc<PipelineFacade>;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct NoopBinding;

    #[async_trait]
    impl NodeBinding for NoopBinding {
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

    fn noop_builder() -> NodeBuilder {
        Arc::new(|_s: &str, _n: &str, _c: &Value| Ok(Box::new(NoopBinding) as Box<dyn NodeBinding>))
    }

    #[tokio::test]
    async fn add_then_remove_restores_empty_state() {
        let facade = PipelineFacade::new(noop_builder());
        let template = StreamTemplate { nodes: HashMap::from([("n1".to_string(), json!({}))]), connections: vec![], device_config: json!({}) };
        facade.add_stream("s", template).await.unwrap();
        facade.remove_stream("s").await.unwrap();
        assert!(facade.reset_pipeline().await.is_err());
    }

    #[tokio::test]
    async fn duplicate_stream_name_rejected() {
        let facade = PipelineFacade::new(noop_builder());
        let template = StreamTemplate { nodes: HashMap::new(), connections: vec![], device_config: json!({}) };
        facade.add_stream("s", template.clone()).await.unwrap();
        assert!(facade.add_stream("s", template).await.is_err());
    }

    #[tokio::test]
    async fn acquire_resets_and_builds_run_string() {
        let facade = PipelineFacade::new(noop_builder());
        let template = StreamTemplate { nodes: HashMap::from([("n1".to_string(), json!({}))]), connections: vec![], device_config: json!({}) };
        facade.add_stream("s", template).await.unwrap();
        let pkg = facade.acquire().await.unwrap();
        assert_eq!(pkg.run_string, "s_n1");
        facade.release(pkg).await;
    }

    #[tokio::test]
    async fn cannot_acquire_twice() {
        let facade = PipelineFacade::new(noop_builder());
        let template = StreamTemplate { nodes: HashMap::from([("n1".to_string(), json!({}))]), connections: vec![], device_config: json!({}) };
        facade.add_stream("s", template).await.unwrap();
        let _pkg = facade.acquire().await.unwrap();
        assert!(facade.acquire().await.is_err());
    }
}

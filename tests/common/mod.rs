//! Shared helpers for integration tests: test node kinds and graph builders

#![allow(dead_code)]

use async_trait::async_trait;
use nodeflow::core::{parse_config, Inputs, NodeContext, NodeKind, Outputs, PortDef};
use nodeflow::{DataType, EngineEvent, EventReceiver, Executor, Node, NodeError, NodeRegistry, Value};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Default, Deserialize)]
struct SlowConfig {
    #[serde(default)]
    millis: u64,
    #[serde(default)]
    ignore_cancel: bool,
}

/// Sleeps, then emits `out = 1`. Returns `Cancelled` as soon as the run is
/// cancelled unless `ignore_cancel` is set.
pub struct SlowNode;

#[async_trait]
impl NodeKind for SlowNode {
    fn kind(&self) -> &str {
        "slow"
    }

    fn create_default(&self, id: &str) -> Node {
        Node::new(id, self.kind(), json!({"millis": 10}))
    }

    fn input_ports(&self, _config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        Ok(vec![PortDef::new("in", DataType::Any).optional()])
    }

    fn output_ports(&self, _config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        Ok(vec![PortDef::new("out", DataType::Number)])
    }

    async fn process(
        &self,
        config: &serde_json::Value,
        _inputs: Inputs,
        ctx: &NodeContext,
    ) -> Result<Outputs, NodeError> {
        let config: SlowConfig = parse_config(config)?;
        let sleep = tokio::time::sleep(Duration::from_millis(config.millis));
        if config.ignore_cancel {
            sleep.await;
        } else {
            tokio::select! {
                _ = ctx.cancelled() => return Err(NodeError::Cancelled),
                _ = sleep => {}
            }
        }
        Ok(Outputs::new().with("out", Value::number(1.0)))
    }
}

/// Always fails with a processing error
pub struct FailNode;

#[async_trait]
impl NodeKind for FailNode {
    fn kind(&self) -> &str {
        "fail"
    }

    fn create_default(&self, id: &str) -> Node {
        Node::new(id, self.kind(), serde_json::Value::Null)
    }

    fn input_ports(&self, _config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        Ok(vec![PortDef::new("in", DataType::Any).optional()])
    }

    fn output_ports(&self, _config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        Ok(vec![PortDef::new("out", DataType::Number)])
    }

    async fn process(
        &self,
        _config: &serde_json::Value,
        _inputs: Inputs,
        _ctx: &NodeContext,
    ) -> Result<Outputs, NodeError> {
        Err(NodeError::processing("boom"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct StreamConfig {
    #[serde(default)]
    chunks: Vec<String>,
}

/// Emits the growing text on `text` after every chunk, then returns it
pub struct StreamNode;

#[async_trait]
impl NodeKind for StreamNode {
    fn kind(&self) -> &str {
        "stream"
    }

    fn create_default(&self, id: &str) -> Node {
        Node::new(id, self.kind(), json!({"chunks": ["Hel", "lo"]}))
    }

    fn input_ports(&self, _config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        Ok(Vec::new())
    }

    fn output_ports(&self, _config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        Ok(vec![PortDef::new("text", DataType::String)])
    }

    async fn process(
        &self,
        config: &serde_json::Value,
        _inputs: Inputs,
        ctx: &NodeContext,
    ) -> Result<Outputs, NodeError> {
        let config: StreamConfig = parse_config(config)?;
        let mut text = String::new();
        for chunk in &config.chunks {
            ctx.check_cancelled()?;
            text.push_str(chunk);
            ctx.emit_partial("text", Value::string(text.clone()));
            tokio::task::yield_now().await;
        }
        Ok(Outputs::new().with("text", Value::string(text)))
    }
}

pub fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::with_builtins();
    registry.register(SlowNode);
    registry.register(FailNode);
    registry.register(StreamNode);
    registry
}

pub fn executor() -> Executor {
    init_logging();
    Executor::new(registry())
}

pub fn input(id: &str, data_type: &str) -> Node {
    Node::new(id, "graph_input", json!({"id": id, "data_type": data_type}))
}

pub fn number_input(id: &str) -> Node {
    input(id, "number")
}

pub fn output(id: &str) -> Node {
    Node::new(id, "graph_output", json!({"id": id}))
}

pub fn math(id: &str, operation: &str) -> Node {
    Node::new(id, "math", json!({"operation": operation}))
}

pub fn slow(id: &str, millis: u64) -> Node {
    Node::new(id, "slow", json!({"millis": millis}))
}

/// Everything already delivered to `rx`
pub fn drain(rx: &mut EventReceiver) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Node ids of `NodeStarted` events, in order
pub fn started(events: &[EngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::NodeStarted { node_id, .. } => Some(node_id.to_string()),
            _ => None,
        })
        .collect()
}

/// Wait until `node` has been dispatched
pub async fn wait_for_start(rx: &mut EventReceiver, node: &str) {
    while let Some(event) = rx.recv().await {
        if let EngineEvent::NodeStarted { node_id, .. } = &event {
            if node_id.as_str() == node {
                return;
            }
        }
    }
    panic!("run ended before {} started", node);
}

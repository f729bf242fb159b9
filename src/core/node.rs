//! Node contract - the interface every node kind implements
//!
//! Port sets are a pure function of configuration. The scheduler only ever
//! talks to a kind through [`NodeKind`]; it never reads kind-specific config.

use super::cancel::CancellationToken;
use super::graph::{Node, NodeId};
use super::value::{DataType, Slot, Value};
use crate::error::NodeError;
use crate::events::{EngineEvent, EventStream};
use crate::run::RunId;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;

/// A named, typed input or output slot
#[derive(Debug, Clone, PartialEq)]
pub struct PortDef {
    pub id: String,
    pub data_type: DataType,
    pub title: String,
    pub required: bool,
}

impl PortDef {
    /// A required port titled after its id
    pub fn new(id: impl Into<String>, data_type: DataType) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            data_type,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn required_if(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }
}

/// Port snapshot for one configuration
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePorts {
    pub inputs: Vec<PortDef>,
    pub outputs: Vec<PortDef>,
}

impl NodePorts {
    pub fn input(&self, id: &str) -> Option<&PortDef> {
        self.inputs.iter().find(|p| p.id == id)
    }

    pub fn output(&self, id: &str) -> Option<&PortDef> {
        self.outputs.iter().find(|p| p.id == id)
    }
}

/// How the scheduler treats a node beyond plain data flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRole {
    Standard,
    /// Reads the run's initial input with this id
    GraphInput(String),
    /// Its `value` output becomes the run's final output with this id
    GraphOutput(String),
    /// Drives a loop region through [`LoopSignal`]
    LoopController,
}

/// Output port read by the scheduler for [`NodeRole::GraphOutput`] nodes
pub const GRAPH_OUTPUT_PORT: &str = "value";

/// Coerced input values handed to `process`
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    values: HashMap<String, Arc<Value>>,
}

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, port: impl Into<String>, value: Value) -> Self {
        self.insert(port, Arc::new(value));
        self
    }

    pub(crate) fn insert(&mut self, port: impl Into<String>, value: Arc<Value>) {
        self.values.insert(port.into(), value);
    }

    /// Value on `port`, or `None` when absent
    pub fn get(&self, port: &str) -> Option<&Value> {
        self.values.get(port).map(|v| v.as_ref())
    }

    pub fn require(&self, port: &str) -> Result<&Value, NodeError> {
        self.get(port)
            .ok_or_else(|| NodeError::MissingInput(port.to_string()))
    }

    pub fn number(&self, port: &str) -> Result<f64, NodeError> {
        let value = self.require(port)?;
        value.as_number().ok_or_else(|| {
            NodeError::processing(format!(
                "input '{}' should be a number, got {}",
                port,
                value.data_type()
            ))
        })
    }

    pub fn optional_number(&self, port: &str) -> Result<Option<f64>, NodeError> {
        match self.get(port) {
            Some(_) => self.number(port).map(Some),
            None => Ok(None),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Loop controller decision after each evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSignal {
    /// Re-run the body with the controller's new outputs
    Continue,
    /// Stop iterating
    Break,
}

/// Values produced by `process`. Ports never set are absent.
#[derive(Debug, Clone, Default)]
pub struct Outputs {
    slots: HashMap<String, Slot>,
    signal: Option<LoopSignal>,
}

impl Outputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, port: impl Into<String>, value: Value) -> Self {
        self.set(port, value);
        self
    }

    pub fn set(&mut self, port: impl Into<String>, value: Value) {
        self.slots.insert(port.into(), Slot::present(value));
    }

    /// Mark `port` as a branch not taken
    pub fn exclude(mut self, port: impl Into<String>) -> Self {
        self.slots.insert(port.into(), Slot::Excluded);
        self
    }

    pub fn with_signal(mut self, signal: LoopSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn slot(&self, port: &str) -> Slot {
        self.slots.get(port).cloned().unwrap_or(Slot::Absent)
    }

    pub fn get(&self, port: &str) -> Option<&Value> {
        self.slots.get(port).and_then(Slot::value)
    }

    pub fn signal(&self) -> Option<LoopSignal> {
        self.signal
    }

    /// All present values, by port
    pub fn values(&self) -> HashMap<String, Value> {
        self.slots
            .iter()
            .filter_map(|(port, slot)| slot.value().map(|v| (port.clone(), v.clone())))
            .collect()
    }

    /// Outputs where every listed port is excluded
    pub(crate) fn all_excluded<'a>(ports: impl IntoIterator<Item = &'a PortDef>) -> Self {
        ports
            .into_iter()
            .fold(Self::new(), |outputs, port| outputs.exclude(port.id.clone()))
    }

    pub(crate) fn from_values(values: &HashMap<String, Value>) -> Self {
        values
            .iter()
            .fold(Self::new(), |outputs, (port, value)| {
                outputs.with(port.clone(), value.clone())
            })
    }
}

/// Execution context handed to `process`
#[derive(Clone)]
pub struct NodeContext {
    run_id: RunId,
    node_id: NodeId,
    iteration: u32,
    cancel: CancellationToken,
    graph_inputs: Arc<HashMap<String, Value>>,
    events: Option<Arc<EventStream>>,
}

impl NodeContext {
    pub(crate) fn new(
        run_id: RunId,
        node_id: NodeId,
        iteration: u32,
        cancel: CancellationToken,
        graph_inputs: Arc<HashMap<String, Value>>,
        events: Arc<EventStream>,
    ) -> Self {
        Self {
            run_id,
            node_id,
            iteration,
            cancel,
            graph_inputs,
            events: Some(events),
        }
    }

    /// A context attached to no run, for driving a kind directly.
    /// Partial outputs are dropped.
    pub fn standalone(node_id: impl Into<String>) -> Self {
        Self {
            run_id: RunId::default(),
            node_id: NodeId::new(node_id),
            iteration: 0,
            cancel: CancellationToken::new(),
            graph_inputs: Arc::new(HashMap::new()),
            events: None,
        }
    }

    pub fn with_graph_inputs(mut self, inputs: HashMap<String, Value>) -> Self {
        self.graph_inputs = Arc::new(inputs);
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Number of completed passes of the enclosing loop region (0 outside loops)
    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the run is cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// `Err(Cancelled)` once the run has been cancelled; call at safe points
    pub fn check_cancelled(&self) -> Result<(), NodeError> {
        if self.is_cancelled() {
            Err(NodeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Initial input supplied to the run under `id`
    pub fn graph_input(&self, id: &str) -> Option<&Value> {
        self.graph_inputs.get(id)
    }

    /// Report an incremental result on `port` before `process` returns.
    /// Does not affect scheduling.
    pub fn emit_partial(&self, port: impl Into<String>, value: Value) {
        if let Some(events) = &self.events {
            events.emit(EngineEvent::NodePartialOutput {
                run_id: self.run_id,
                node_id: self.node_id.clone(),
                port_id: port.into(),
                value,
            });
        }
    }
}

/// The contract every node kind implements
#[async_trait]
pub trait NodeKind: Send + Sync {
    /// Registry discriminator
    fn kind(&self) -> &str;

    /// A node of this kind with default configuration
    fn create_default(&self, id: &str) -> Node;

    fn input_ports(&self, config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError>;

    fn output_ports(&self, config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError>;

    fn role(&self, _config: &serde_json::Value) -> NodeRole {
        NodeRole::Standard
    }

    /// Compute outputs. Long-running work should observe `ctx`'s cancellation
    /// and return [`NodeError::Cancelled`] promptly once signalled.
    async fn process(
        &self,
        config: &serde_json::Value,
        inputs: Inputs,
        ctx: &NodeContext,
    ) -> Result<Outputs, NodeError>;
}

/// Deserialize a kind's typed configuration; `null` means all defaults.
pub fn parse_config<T: DeserializeOwned + Default>(
    config: &serde_json::Value,
) -> Result<T, NodeError> {
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone())
        .map_err(|e| NodeError::processing(format!("invalid configuration: {}", e)))
}

//! Graph boundary nodes - run inputs in, final outputs out

use crate::core::{
    coerce_optional, parse_config, DataType, Inputs, Node, NodeContext, NodeKind, NodeRole,
    Outputs, PortDef, Value, GRAPH_OUTPUT_PORT,
};
use crate::error::NodeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphPortConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default = "any_type")]
    pub data_type: DataType,
    /// Used by graph inputs when the run supplies no value
    #[serde(default)]
    pub default: Option<Value>,
}

fn any_type() -> DataType {
    DataType::Any
}

impl Default for GraphPortConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            data_type: any_type(),
            default: None,
        }
    }
}

impl GraphPortConfig {
    fn parse(config: &serde_json::Value) -> Result<Self, NodeError> {
        let parsed: Self = parse_config(config)?;
        if parsed.id.trim().is_empty() {
            return Err(NodeError::processing("graph port id must not be empty"));
        }
        Ok(parsed)
    }
}

/// Emits the run's initial input with the configured id, falling back to the
/// configured default; absent when neither exists.
pub struct GraphInputNode;

#[async_trait]
impl NodeKind for GraphInputNode {
    fn kind(&self) -> &str {
        "graph_input"
    }

    fn create_default(&self, id: &str) -> Node {
        Node::new(
            id,
            self.kind(),
            serde_json::json!({ "id": "input", "data_type": "any" }),
        )
        .with_title("Graph Input")
    }

    fn input_ports(&self, config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        GraphPortConfig::parse(config)?;
        Ok(Vec::new())
    }

    fn output_ports(&self, config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        let config = GraphPortConfig::parse(config)?;
        Ok(vec![PortDef::new("value", config.data_type).with_title(config.id)])
    }

    fn role(&self, config: &serde_json::Value) -> NodeRole {
        let config: GraphPortConfig = parse_config(config).unwrap_or_default();
        NodeRole::GraphInput(config.id)
    }

    async fn process(
        &self,
        config: &serde_json::Value,
        _inputs: Inputs,
        ctx: &NodeContext,
    ) -> Result<Outputs, NodeError> {
        let config = GraphPortConfig::parse(config)?;
        let supplied = ctx.graph_input(&config.id).or(config.default.as_ref());

        let mut outputs = Outputs::new();
        if let Some(value) = coerce_optional(supplied, &config.data_type, &config.id)? {
            outputs.set("value", value);
        }
        Ok(outputs)
    }
}

/// Records its `value` input as the run's final output with the configured id
pub struct GraphOutputNode;

#[async_trait]
impl NodeKind for GraphOutputNode {
    fn kind(&self) -> &str {
        "graph_output"
    }

    fn create_default(&self, id: &str) -> Node {
        Node::new(
            id,
            self.kind(),
            serde_json::json!({ "id": "output", "data_type": "any" }),
        )
        .with_title("Graph Output")
    }

    fn input_ports(&self, config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        let config = GraphPortConfig::parse(config)?;
        Ok(vec![PortDef::new("value", config.data_type)
            .with_title(config.id)
            .optional()])
    }

    fn output_ports(&self, config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        let config = GraphPortConfig::parse(config)?;
        Ok(vec![PortDef::new(GRAPH_OUTPUT_PORT, config.data_type).with_title(config.id)])
    }

    fn role(&self, config: &serde_json::Value) -> NodeRole {
        let config: GraphPortConfig = parse_config(config).unwrap_or_default();
        NodeRole::GraphOutput(config.id)
    }

    async fn process(
        &self,
        _config: &serde_json::Value,
        inputs: Inputs,
        _ctx: &NodeContext,
    ) -> Result<Outputs, NodeError> {
        let mut outputs = Outputs::new();
        if let Some(value) = inputs.get("value") {
            outputs.set(GRAPH_OUTPUT_PORT, value.clone());
        }
        Ok(outputs)
    }
}

//! Control-flow nodes - comparisons and conditional routing

use crate::core::{parse_config, DataType, Inputs, Node, NodeContext, NodeKind, Outputs, PortDef, Value};
use crate::error::NodeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[default]
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Comparison {
    pub fn evaluate(&self, a: f64, b: f64) -> bool {
        match self {
            Self::Less => a < b,
            Self::LessOrEqual => a <= b,
            Self::Greater => a > b,
            Self::GreaterOrEqual => a >= b,
            Self::Equal => a == b,
            Self::NotEqual => a != b,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompareConfig {
    #[serde(default)]
    pub comparison: Comparison,
}

/// Numeric comparison of `a` and `b`
pub struct CompareNode;

#[async_trait]
impl NodeKind for CompareNode {
    fn kind(&self) -> &str {
        "compare"
    }

    fn create_default(&self, id: &str) -> Node {
        Node::new(id, self.kind(), serde_json::json!({ "comparison": "==" })).with_title("Compare")
    }

    fn input_ports(&self, config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        parse_config::<CompareConfig>(config)?;
        Ok(vec![
            PortDef::new("a", DataType::Number),
            PortDef::new("b", DataType::Number),
        ])
    }

    fn output_ports(&self, _config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        Ok(vec![PortDef::new("result", DataType::Boolean)])
    }

    async fn process(
        &self,
        config: &serde_json::Value,
        inputs: Inputs,
        _ctx: &NodeContext,
    ) -> Result<Outputs, NodeError> {
        let config: CompareConfig = parse_config(config)?;
        let result = config
            .comparison
            .evaluate(inputs.number("a")?, inputs.number("b")?);
        Ok(Outputs::new().with("result", Value::boolean(result)))
    }
}

/// Routes `value` to the `true` or `false` output and excludes the other
/// branch. Without a `value`, the taken branch carries a control-flow signal.
pub struct IfNode;

#[async_trait]
impl NodeKind for IfNode {
    fn kind(&self) -> &str {
        "if"
    }

    fn create_default(&self, id: &str) -> Node {
        Node::new(id, self.kind(), serde_json::Value::Null).with_title("If")
    }

    fn input_ports(&self, _config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        Ok(vec![
            PortDef::new("condition", DataType::Boolean),
            PortDef::new("value", DataType::Any).optional(),
        ])
    }

    fn output_ports(&self, _config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        Ok(vec![
            PortDef::new("true", DataType::Any),
            PortDef::new("false", DataType::Any),
        ])
    }

    async fn process(
        &self,
        _config: &serde_json::Value,
        inputs: Inputs,
        _ctx: &NodeContext,
    ) -> Result<Outputs, NodeError> {
        let condition = inputs
            .require("condition")?
            .as_bool()
            .ok_or_else(|| NodeError::processing("condition should be a boolean"))?;
        let value = inputs.get("value").cloned().unwrap_or(Value::ControlFlow);

        let (taken, skipped) = if condition {
            ("true", "false")
        } else {
            ("false", "true")
        };
        Ok(Outputs::new().with(taken, value).exclude(skipped))
    }
}

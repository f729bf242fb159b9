//! Arithmetic node - binary and unary operations over numbers
//!
//! The operation comes from configuration, or from a string-typed
//! `operation` input when `use_operation_input` is set. `b` is only
//! required when the configured operation is binary; with the operation
//! supplied at runtime it is optional.

use crate::core::{parse_config, DataType, Inputs, Node, NodeContext, NodeKind, Outputs, PortDef, Value};
use crate::error::NodeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Operation {
    #[default]
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Subtract,
    #[serde(rename = "*")]
    Multiply,
    #[serde(rename = "/")]
    Divide,
    #[serde(rename = "^")]
    Power,
    #[serde(rename = "%")]
    Modulo,
    #[serde(rename = "negate")]
    Negate,
    #[serde(rename = "abs")]
    Abs,
}

impl Operation {
    pub fn is_unary(&self) -> bool {
        matches!(self, Self::Negate | Self::Abs)
    }

    pub fn apply(&self, a: f64, b: Option<f64>) -> Result<f64, NodeError> {
        match (self, b) {
            (Self::Negate, _) => Ok(-a),
            (Self::Abs, _) => Ok(a.abs()),
            (_, None) => Err(NodeError::MissingInput("b".to_string())),
            (Self::Add, Some(b)) => Ok(a + b),
            (Self::Subtract, Some(b)) => Ok(a - b),
            (Self::Multiply, Some(b)) => Ok(a * b),
            (Self::Divide, Some(b)) if b == 0.0 => Err(NodeError::processing("division by zero")),
            (Self::Divide, Some(b)) => Ok(a / b),
            (Self::Power, Some(b)) => Ok(a.powf(b)),
            (Self::Modulo, Some(b)) if b == 0.0 => Err(NodeError::processing("modulo by zero")),
            (Self::Modulo, Some(b)) => Ok(a % b),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Power => "^",
            Self::Modulo => "%",
            Self::Negate => "negate",
            Self::Abs => "abs",
        };
        f.write_str(symbol)
    }
}

impl FromStr for Operation {
    type Err = NodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_string()))
            .map_err(|_| NodeError::processing(format!("unknown operation '{}'", s)))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MathConfig {
    #[serde(default)]
    pub operation: Operation,
    #[serde(default)]
    pub use_operation_input: bool,
}

pub struct MathNode;

#[async_trait]
impl NodeKind for MathNode {
    fn kind(&self) -> &str {
        "math"
    }

    fn create_default(&self, id: &str) -> Node {
        Node::new(id, self.kind(), serde_json::json!({ "operation": "+" })).with_title("Math")
    }

    fn input_ports(&self, config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        let config: MathConfig = parse_config(config)?;
        let b_required = !config.use_operation_input && !config.operation.is_unary();

        let mut ports = vec![
            PortDef::new("a", DataType::Number).with_title("A"),
            PortDef::new("b", DataType::Number)
                .with_title("B")
                .required_if(b_required),
        ];
        if config.use_operation_input {
            ports.push(PortDef::new("operation", DataType::String).with_title("Operation"));
        }
        Ok(ports)
    }

    fn output_ports(&self, _config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        Ok(vec![PortDef::new("result", DataType::Number).with_title("Result")])
    }

    async fn process(
        &self,
        config: &serde_json::Value,
        inputs: Inputs,
        _ctx: &NodeContext,
    ) -> Result<Outputs, NodeError> {
        let config: MathConfig = parse_config(config)?;
        let operation = if config.use_operation_input {
            let requested = inputs.require("operation")?;
            requested
                .as_str()
                .ok_or_else(|| NodeError::processing("operation input should be a string"))?
                .parse()?
        } else {
            config.operation
        };

        let a = inputs.number("a")?;
        let b = inputs.optional_number("b")?;
        let result = operation.apply(a, b)?;
        Ok(Outputs::new().with("result", Value::number(result)))
    }
}

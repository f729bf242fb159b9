//! Loop controller - carries accumulators through a loop region
//!
//! # Ports
//! - Input: `default{i}` - initial accumulator value (from outside the loop)
//! - Input: `input{i}` - accumulator value fed back from the body
//! - Input: `continue` - fed back from the body; absent means stop
//! - Output: `output{i}` - accumulator handed to the body while looping
//! - Output: `result{i}` - final accumulator once the loop stops
//!
//! The first evaluation always enters the body with the defaults. Later
//! evaluations continue while `continue` is true.

use crate::core::{
    parse_config, DataType, Inputs, LoopSignal, Node, NodeContext, NodeKind, NodeRole, Outputs,
    PortDef,
};
use crate::error::NodeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopControllerConfig {
    #[serde(default = "one")]
    pub accumulators: u32,
}

fn one() -> u32 {
    1
}

impl Default for LoopControllerConfig {
    fn default() -> Self {
        Self { accumulators: 1 }
    }
}

impl LoopControllerConfig {
    fn parse(config: &serde_json::Value) -> Result<Self, NodeError> {
        let parsed: Self = parse_config(config)?;
        if parsed.accumulators == 0 {
            return Err(NodeError::processing("a loop needs at least one accumulator"));
        }
        Ok(parsed)
    }
}

pub struct LoopControllerNode;

#[async_trait]
impl NodeKind for LoopControllerNode {
    fn kind(&self) -> &str {
        "loop_controller"
    }

    fn create_default(&self, id: &str) -> Node {
        Node::new(id, self.kind(), serde_json::json!({ "accumulators": 1 }))
            .with_title("Loop Controller")
    }

    fn input_ports(&self, config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        let config = LoopControllerConfig::parse(config)?;
        let mut ports = vec![PortDef::new("continue", DataType::Boolean)
            .with_title("Continue")
            .optional()];
        for i in 1..=config.accumulators {
            ports.push(PortDef::new(format!("default{}", i), DataType::Any));
            ports.push(PortDef::new(format!("input{}", i), DataType::Any).optional());
        }
        Ok(ports)
    }

    fn output_ports(&self, config: &serde_json::Value) -> Result<Vec<PortDef>, NodeError> {
        let config = LoopControllerConfig::parse(config)?;
        let mut ports = Vec::new();
        for i in 1..=config.accumulators {
            ports.push(PortDef::new(format!("output{}", i), DataType::Any));
            ports.push(PortDef::new(format!("result{}", i), DataType::Any));
        }
        Ok(ports)
    }

    fn role(&self, _config: &serde_json::Value) -> NodeRole {
        NodeRole::LoopController
    }

    async fn process(
        &self,
        config: &serde_json::Value,
        inputs: Inputs,
        ctx: &NodeContext,
    ) -> Result<Outputs, NodeError> {
        let config = LoopControllerConfig::parse(config)?;
        let first_pass = ctx.iteration() == 0;
        let keep_going = first_pass
            || inputs
                .get("continue")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

        let mut outputs = Outputs::new();
        for i in 1..=config.accumulators {
            let default = inputs.require(&format!("default{}", i))?;
            let value = if first_pass {
                default
            } else {
                inputs.get(&format!("input{}", i)).unwrap_or(default)
            };

            let (live, excluded) = if keep_going {
                (format!("output{}", i), format!("result{}", i))
            } else {
                (format!("result{}", i), format!("output{}", i))
            };
            outputs = outputs.with(live, value.clone()).exclude(excluded);
        }

        let signal = if keep_going {
            LoopSignal::Continue
        } else {
            LoopSignal::Break
        };
        log::debug!(
            "Loop controller {} pass {}: {:?}",
            ctx.node_id(),
            ctx.iteration(),
            signal
        );
        Ok(outputs.with_signal(signal))
    }
}

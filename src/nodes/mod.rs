//! Built-in node kinds

mod flow;
mod graph_io;
mod loop_controller;
mod math;

pub use flow::{CompareNode, Comparison, IfNode};
pub use graph_io::{GraphInputNode, GraphOutputNode, GraphPortConfig};
pub use loop_controller::{LoopControllerConfig, LoopControllerNode};
pub use math::{MathConfig, MathNode, Operation};

use crate::core::NodeKind;
use std::sync::Arc;

/// Every built-in kind, ready for registration
pub fn builtin_kinds() -> Vec<Arc<dyn NodeKind>> {
    vec![
        Arc::new(MathNode),
        Arc::new(GraphInputNode),
        Arc::new(GraphOutputNode),
        Arc::new(LoopControllerNode),
        Arc::new(CompareNode),
        Arc::new(IfNode),
    ]
}

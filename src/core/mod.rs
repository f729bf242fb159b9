//! Core engine - value model, graph validation, node contract, scheduling

mod cancel;
mod coerce;
mod executor;
mod graph;
mod node;
mod registry;
mod scheduler;
mod validate;
mod value;

pub use cancel::CancellationToken;
pub use coerce::{coerce, coerce_optional, coercible};
pub use executor::{Executor, Run};
pub use graph::{Connection, ErrorPolicy, Graph, LoopRegion, Metadata, Node, NodeId};
pub use node::{
    parse_config, Inputs, LoopSignal, NodeContext, NodeKind, NodePorts, NodeRole, Outputs,
    PortDef, GRAPH_OUTPUT_PORT,
};
pub use registry::NodeRegistry;
pub use validate::{LoopInfo, ValidatedGraph};
pub use value::{DataType, Media, Slot, Value};

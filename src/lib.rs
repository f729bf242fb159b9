//! NodeFlow - Dataflow Graph Execution Engine
//!
//! Runs graphs of typed processing nodes: validates structure, coerces
//! values across ports, dispatches ready nodes concurrently, iterates loop
//! regions, streams partial results and propagates cancellation and errors.

pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod nodes;
pub mod run;

// Re-exports
pub use config::RunConfig;
pub use core::{
    CancellationToken, DataType, ErrorPolicy, Executor, Graph, LoopRegion, Node, NodeContext,
    NodeId, NodeKind, NodeRegistry, Run, Value,
};
pub use error::{ErrorKind, NodeError, RunError, TypeMismatch, ValidationError};
pub use events::{EngineEvent, EventReceiver, EventStream};
pub use run::{NodeRecord, NodeRun, NodeStatus, RunId, RunResult, RunStatus};

/// Result type alias
pub type Result<T> = anyhow::Result<T>;

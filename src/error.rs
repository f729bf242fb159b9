//! Error taxonomy - validation, coercion, node and run-level errors

use crate::core::{DataType, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Structural problems found before a run is created.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Node '{node}' uses unregistered kind '{kind}'")]
    UnknownKind { node: NodeId, kind: String },

    #[error("Node id '{0}' is used more than once")]
    DuplicateNode(NodeId),

    #[error("Node '{missing}' not found, referenced by {referenced_by}")]
    UnknownNode {
        missing: NodeId,
        referenced_by: String,
    },

    #[error("Node '{node}' has no {direction} port '{port}'")]
    UnknownPort {
        node: NodeId,
        port: String,
        direction: &'static str,
    },

    #[error("Input port '{port}' on node '{node}' has more than one incoming connection")]
    DuplicateTarget { node: NodeId, port: String },

    #[error(
        "Connection {source_node}.{source_port} -> {target_node}.{target_port} cannot coerce {source_type} to {target_type}"
    )]
    IncompatibleTypes {
        source_node: NodeId,
        source_port: String,
        target_node: NodeId,
        target_port: String,
        source_type: DataType,
        target_type: DataType,
    },

    #[error("Cycle outside any loop region through nodes: {}", join_ids(.0))]
    Cycle(Vec<NodeId>),

    #[error("Node '{node}' has an invalid configuration: {message}")]
    InvalidConfig { node: NodeId, message: String },

    #[error("Node '{0}' is declared as a loop controller but its kind is not one")]
    NotALoopController(NodeId),

    #[error("Loop controller '{inner}' lies inside the region of loop controller '{outer}'")]
    NestedLoop { outer: NodeId, inner: NodeId },

    #[error("Loop controller '{0}' has no back-edge, so its region is empty")]
    EmptyLoop(NodeId),

    #[error("Graph output '{id}' is produced by both '{first}' and '{second}'")]
    DuplicateGraphOutput {
        id: String,
        first: NodeId,
        second: NodeId,
    },

    #[error("Initial input '{0}' does not match any graph input")]
    UnknownGraphInput(String),
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A coercion rule does not exist for a (source, target) pair, or the value
/// could not be converted under the rule.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Cannot coerce {source_type} to {target_type} for port '{port}'")]
pub struct TypeMismatch {
    pub source_type: DataType,
    pub target_type: DataType,
    pub port: String,
}

impl TypeMismatch {
    pub fn new(source_type: DataType, target_type: DataType, port: impl Into<String>) -> Self {
        Self {
            source_type,
            target_type,
            port: port.into(),
        }
    }
}

/// Errors local to a single node execution.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatch),

    #[error("Required input '{0}' has no value")]
    MissingInput(String),

    #[error("{0}")]
    Processing(String),

    #[error("Execution was cancelled")]
    Cancelled,

    #[error("Loop exceeded its limit of {limit} iterations")]
    LoopIterationLimitExceeded { limit: u32 },

    #[error("Internal engine error: {0}")]
    Internal(String),
}

impl NodeError {
    /// Shorthand for a kind-specific processing failure.
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TypeMismatch(_) => ErrorKind::TypeMismatch,
            Self::MissingInput(_) => ErrorKind::MissingInput,
            Self::Processing(_) => ErrorKind::NodeProcessing,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::LoopIterationLimitExceeded { .. } => ErrorKind::LoopIterationLimitExceeded,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Classification carried by a [`RunError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TypeMismatch,
    MissingInput,
    NodeProcessing,
    Cancelled,
    LoopIterationLimitExceeded,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeMismatch => write!(f, "type-mismatch"),
            Self::MissingInput => write!(f, "missing-input"),
            Self::NodeProcessing => write!(f, "node-processing"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::LoopIterationLimitExceeded => write!(f, "loop-iteration-limit-exceeded"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Error object surfaced to the caller of a run.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("Node '{node_id}' failed ({kind}): {message}")]
pub struct RunError {
    pub node_id: NodeId,
    pub kind: ErrorKind,
    pub message: String,
}

impl RunError {
    pub fn from_node(node_id: &NodeId, error: &NodeError) -> Self {
        Self {
            node_id: node_id.clone(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_error_kinds() {
        assert_eq!(
            NodeError::MissingInput("b".to_string()).kind(),
            ErrorKind::MissingInput
        );
        assert_eq!(NodeError::Cancelled.kind(), ErrorKind::Cancelled);

        let mismatch: NodeError =
            TypeMismatch::new(DataType::Object, DataType::Boolean, "flag").into();
        assert_eq!(mismatch.kind(), ErrorKind::TypeMismatch);
        assert!(mismatch.to_string().contains("object"));
        assert!(mismatch.to_string().contains("flag"));
    }

    #[test]
    fn test_run_error_from_node() {
        let id = NodeId::new("math");
        let err = RunError::from_node(&id, &NodeError::processing("division by zero"));
        assert_eq!(err.node_id, id);
        assert_eq!(err.kind, ErrorKind::NodeProcessing);
        assert_eq!(err.message, "division by zero");
    }

    #[test]
    fn test_cycle_message_lists_nodes() {
        let err = ValidationError::Cycle(vec![NodeId::new("a"), NodeId::new("b")]);
        assert!(err.to_string().contains("a, b"));
    }
}

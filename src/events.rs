//! Event streaming for run observers
//!
//! JSON-serializable lifecycle events for debuggers, UIs and loggers.
//! Emission never blocks the scheduler and never drops events: each
//! subscriber gets its own unbounded queue.

use crate::core::{NodeId, Value};
use crate::error::RunError;
use crate::run::{RunId, RunStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Events emitted while a graph runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    GraphStarted {
        run_id: RunId,
    },
    NodeStarted {
        run_id: RunId,
        node_id: NodeId,
    },
    /// Incremental result reported before the node returned
    NodePartialOutput {
        run_id: RunId,
        node_id: NodeId,
        port_id: String,
        value: Value,
    },
    NodeFinished {
        run_id: RunId,
        node_id: NodeId,
        outputs: HashMap<String, Value>,
    },
    NodeErrored {
        run_id: RunId,
        node_id: NodeId,
        error: RunError,
    },
    NodeSkipped {
        run_id: RunId,
        node_id: NodeId,
    },
    NodeInterrupted {
        run_id: RunId,
        node_id: NodeId,
    },
    /// A loop controller asked for another pass over its region
    LoopIteration {
        run_id: RunId,
        controller: NodeId,
        iteration: u32,
    },
    GraphFinished {
        run_id: RunId,
        status: RunStatus,
        outputs: HashMap<String, Value>,
    },
}

impl EngineEvent {
    pub fn run_id(&self) -> RunId {
        match self {
            Self::GraphStarted { run_id }
            | Self::NodeStarted { run_id, .. }
            | Self::NodePartialOutput { run_id, .. }
            | Self::NodeFinished { run_id, .. }
            | Self::NodeErrored { run_id, .. }
            | Self::NodeSkipped { run_id, .. }
            | Self::NodeInterrupted { run_id, .. }
            | Self::LoopIteration { run_id, .. }
            | Self::GraphFinished { run_id, .. } => *run_id,
        }
    }

    /// Node the event concerns, if any
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            Self::NodeStarted { node_id, .. }
            | Self::NodePartialOutput { node_id, .. }
            | Self::NodeFinished { node_id, .. }
            | Self::NodeErrored { node_id, .. }
            | Self::NodeSkipped { node_id, .. }
            | Self::NodeInterrupted { node_id, .. } => Some(node_id),
            Self::LoopIteration { controller, .. } => Some(controller),
            Self::GraphStarted { .. } | Self::GraphFinished { .. } => None,
        }
    }

    /// Serialize to JSON line
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Fan-out event stream for multiple consumers.
///
/// A child stream forwards everything it emits to its parent, so an
/// executor-wide subscriber sees every run.
#[derive(Default)]
pub struct EventStream {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<EngineEvent>>>,
    parent: Option<Arc<EventStream>>,
}

impl EventStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(parent: Arc<EventStream>) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            parent: Some(parent),
        }
    }

    /// Emit an event to all subscribers.
    ///
    /// The parent is fed while this stream's lock is held, so parent and
    /// child subscribers see concurrent emits in the same order.
    pub fn emit(&self, event: EngineEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        if let Some(parent) = &self.parent {
            parent.emit(event);
        }
    }

    /// Subscribe to every event emitted from now on
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

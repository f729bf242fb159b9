//! Graph model - nodes, connections and loop regions

use super::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Node identity within a graph
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// What the scheduler does when a node's `process` fails
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Fail the whole run and cancel everything still in flight.
    #[default]
    Escalate,
    /// Record the error, exclude the node's outputs, keep running siblings.
    Isolate,
    /// Treat as success with these output values.
    Substitute(HashMap<String, Value>),
    /// Treat as success with every output absent.
    Ignore,
}

/// A configured unit of computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub error_policy: ErrorPolicy,
}

impl Node {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            id: NodeId::new(id),
            kind: kind.into(),
            title: None,
            config,
            error_policy: ErrorPolicy::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Replace the configuration. Ports are derived from configuration, so the
    /// next lookup through the registry sees the new port set.
    pub fn reconfigure(&mut self, config: serde_json::Value) {
        self.config = config;
    }
}

/// Directed edge `(source node, source port) -> (target node, target port)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    pub source: NodeId,
    pub source_port: String,
    pub target: NodeId,
    pub target_port: String,
}

impl Connection {
    pub fn new(
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        Self {
            source: NodeId::new(source),
            source_port: source_port.into(),
            target: NodeId::new(target),
            target_port: target_port.into(),
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source, self.source_port, self.target, self.target_port
        )
    }
}

/// Designates a loop controller; its body is derived from the back-edges
/// feeding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub controller: NodeId,
    /// Overrides the run-level iteration cap for this region
    #[serde(default)]
    pub max_iterations: Option<u32>,
}

impl LoopRegion {
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: NodeId::new(controller),
            max_iterations: None,
        }
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub description: Option<String>,
}

/// A user-authored graph. Node order is preserved and used to break ties
/// between otherwise unordered nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub loops: Vec<LoopRegion>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// Connect `source.source_port` to `target.target_port`
    pub fn connect(
        mut self,
        source: &str,
        source_port: &str,
        target: &str,
        target_port: &str,
    ) -> Self {
        self.connections
            .push(Connection::new(source, source_port, target, target_port));
        self
    }

    pub fn with_loop(mut self, region: LoopRegion) -> Self {
        self.loops.push(region);
        self
    }

    pub fn add_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn add_connection(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    /// Get node by ID
    pub fn get_node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn get_node_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| &n.id == id)
    }

    /// Connections feeding `node`
    pub fn incoming<'a>(&'a self, node: &'a NodeId) -> impl Iterator<Item = &'a Connection> {
        self.connections.iter().filter(move |c| &c.target == node)
    }

    /// Connections leaving `node`
    pub fn outgoing<'a>(&'a self, node: &'a NodeId) -> impl Iterator<Item = &'a Connection> {
        self.connections.iter().filter(move |c| &c.source == node)
    }
}

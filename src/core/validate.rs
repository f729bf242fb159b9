//! Graph validation - resolves ports and roles, classifies loop back-edges,
//! and orders nodes topologically.

use super::coerce::coercible;
use super::graph::{Connection, Graph, Node, NodeId};
use super::node::{NodeKind, NodePorts, NodeRole};
use super::registry::NodeRegistry;
use crate::error::ValidationError;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// A loop region resolved against the graph
#[derive(Debug, Clone)]
pub struct LoopInfo {
    pub controller: NodeId,
    pub body: HashSet<NodeId>,
    pub max_iterations: Option<u32>,
}

struct Resolved {
    kind: Arc<dyn NodeKind>,
    ports: Arc<NodePorts>,
    role: NodeRole,
}

/// A graph that passed validation, with everything the scheduler needs
/// precomputed. Immutable for the duration of a run.
pub struct ValidatedGraph {
    graph: Graph,
    resolved: HashMap<NodeId, Resolved>,
    declared: HashMap<NodeId, usize>,
    order: Vec<NodeId>,
    incoming: HashMap<NodeId, Vec<usize>>,
    outgoing: HashMap<NodeId, Vec<usize>>,
    back_edges: HashSet<usize>,
    loops: Vec<LoopInfo>,
    body_of: HashMap<NodeId, usize>,
    controller_of: HashMap<NodeId, usize>,
}

impl Graph {
    /// Check structure against `registry`. A graph that fails here can never
    /// be run.
    pub fn validate(&self, registry: &NodeRegistry) -> Result<ValidatedGraph, ValidationError> {
        ValidatedGraph::build(self.clone(), registry)
    }
}

impl ValidatedGraph {
    fn build(graph: Graph, registry: &NodeRegistry) -> Result<Self, ValidationError> {
        let mut declared = HashMap::new();
        let mut resolved = HashMap::new();
        let mut output_ids: HashMap<String, NodeId> = HashMap::new();

        for (idx, node) in graph.nodes.iter().enumerate() {
            if declared.insert(node.id.clone(), idx).is_some() {
                return Err(ValidationError::DuplicateNode(node.id.clone()));
            }
            let ports = registry.ports(node)?;
            let kind = registry
                .get(&node.kind)
                .ok_or_else(|| ValidationError::UnknownKind {
                    node: node.id.clone(),
                    kind: node.kind.clone(),
                })?;
            let role = kind.role(&node.config);
            if let NodeRole::GraphOutput(id) = &role {
                if let Some(first) = output_ids.insert(id.clone(), node.id.clone()) {
                    return Err(ValidationError::DuplicateGraphOutput {
                        id: id.clone(),
                        first,
                        second: node.id.clone(),
                    });
                }
            }
            resolved.insert(node.id.clone(), Resolved { kind, ports, role });
        }

        let mut incoming: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut outgoing: HashMap<NodeId, Vec<usize>> = HashMap::new();
        let mut targets = HashSet::new();

        for (idx, conn) in graph.connections.iter().enumerate() {
            check_connection(conn, &resolved)?;
            if !targets.insert((conn.target.clone(), conn.target_port.clone())) {
                return Err(ValidationError::DuplicateTarget {
                    node: conn.target.clone(),
                    port: conn.target_port.clone(),
                });
            }
            outgoing.entry(conn.source.clone()).or_default().push(idx);
            incoming.entry(conn.target.clone()).or_default().push(idx);
        }

        let mut validated = Self {
            graph,
            resolved,
            declared,
            order: Vec::new(),
            incoming,
            outgoing,
            back_edges: HashSet::new(),
            loops: Vec::new(),
            body_of: HashMap::new(),
            controller_of: HashMap::new(),
        };
        validated.resolve_loops()?;
        validated.order = validated.topological_order()?;

        log::debug!(
            "Validated graph: {} nodes, {} connections, {} loop regions",
            validated.graph.nodes.len(),
            validated.graph.connections.len(),
            validated.loops.len()
        );
        Ok(validated)
    }

    fn resolve_loops(&mut self) -> Result<(), ValidationError> {
        let regions = self.graph.loops.clone();
        for region in &regions {
            let controller = &region.controller;
            let resolved =
                self.resolved
                    .get(controller)
                    .ok_or_else(|| ValidationError::UnknownNode {
                        missing: controller.clone(),
                        referenced_by: "a loop region".to_string(),
                    })?;
            if resolved.role != NodeRole::LoopController {
                return Err(ValidationError::NotALoopController(controller.clone()));
            }

            // Everything downstream of the controller without passing back into it
            let reach = self.traverse(controller, |c| &c.target != controller, true);

            let back: Vec<usize> = self
                .incoming_indices(controller)
                .iter()
                .copied()
                .filter(|&idx| reach.contains(&self.graph.connections[idx].source))
                .collect();
            if back.is_empty() {
                return Err(ValidationError::EmptyLoop(controller.clone()));
            }

            // Upstream of the back-edge sources, stopping at the controller
            let mut feeds_back = HashSet::new();
            for &idx in &back {
                let source = &self.graph.connections[idx].source;
                feeds_back.insert(source.clone());
                feeds_back.extend(self.traverse(source, |c| &c.source != controller, false));
            }

            let body: HashSet<NodeId> = reach.intersection(&feeds_back).cloned().collect();
            self.back_edges.extend(back);

            let region_idx = self.loops.len();
            for node in &body {
                if let Some(&other) = self.body_of.get(node) {
                    return Err(ValidationError::NestedLoop {
                        outer: self.loops[other].controller.clone(),
                        inner: controller.clone(),
                    });
                }
                self.body_of.insert(node.clone(), region_idx);
            }
            self.controller_of.insert(controller.clone(), region_idx);
            self.loops.push(LoopInfo {
                controller: controller.clone(),
                body,
                max_iterations: region.max_iterations,
            });
        }

        for controller in self.controller_of.keys() {
            if let Some(&outer) = self.body_of.get(controller) {
                return Err(ValidationError::NestedLoop {
                    outer: self.loops[outer].controller.clone(),
                    inner: controller.clone(),
                });
            }
        }
        Ok(())
    }

    /// Nodes reachable from `start` (excluding `start`) along connections
    /// accepted by `follow`, walking forward or backward.
    fn traverse(
        &self,
        start: &NodeId,
        follow: impl Fn(&Connection) -> bool,
        forward: bool,
    ) -> HashSet<NodeId> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([start.clone()]);
        while let Some(node) = queue.pop_front() {
            let edges = if forward {
                self.outgoing_indices(&node)
            } else {
                self.incoming_indices(&node)
            };
            for &idx in edges {
                let conn = &self.graph.connections[idx];
                if !follow(conn) {
                    continue;
                }
                let next = if forward { &conn.target } else { &conn.source };
                if next != start && seen.insert(next.clone()) {
                    queue.push_back(next.clone());
                }
            }
        }
        seen
    }

    /// Kahn's algorithm over forward edges; ties go to declaration order.
    fn topological_order(&self) -> Result<Vec<NodeId>, ValidationError> {
        let nodes = &self.graph.nodes;
        let mut in_degree = vec![0usize; nodes.len()];
        for (idx, conn) in self.graph.connections.iter().enumerate() {
            if !self.back_edges.contains(&idx) {
                in_degree[self.declared[&conn.target]] += 1;
            }
        }

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(nodes.len());

        while let Some(idx) = ready.pop_first() {
            let id = &nodes[idx].id;
            for &edge in self.outgoing_indices(id) {
                if self.back_edges.contains(&edge) {
                    continue;
                }
                let target = self.declared[&self.graph.connections[edge].target];
                in_degree[target] -= 1;
                if in_degree[target] == 0 {
                    ready.insert(target);
                }
            }
            order.push(id.clone());
        }

        if order.len() != nodes.len() {
            let cyclic = nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| in_degree[*i] > 0)
                .map(|(_, n)| n.id.clone())
                .collect();
            return Err(ValidationError::Cycle(cyclic));
        }
        Ok(order)
    }

    fn incoming_indices(&self, node: &NodeId) -> &[usize] {
        self.incoming.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    fn outgoing_indices(&self, node: &NodeId) -> &[usize] {
        self.outgoing.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Topological execution order
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.declared.get(id).map(|&idx| &self.graph.nodes[idx])
    }

    pub fn ports(&self, id: &NodeId) -> Option<&NodePorts> {
        self.resolved.get(id).map(|r| r.ports.as_ref())
    }

    pub fn role(&self, id: &NodeId) -> Option<&NodeRole> {
        self.resolved.get(id).map(|r| &r.role)
    }

    pub fn kind(&self, id: &NodeId) -> Option<Arc<dyn NodeKind>> {
        self.resolved.get(id).map(|r| Arc::clone(&r.kind))
    }

    pub fn connection(&self, idx: usize) -> &Connection {
        &self.graph.connections[idx]
    }

    /// Indices of connections feeding `node`
    pub fn incoming(&self, node: &NodeId) -> &[usize] {
        self.incoming_indices(node)
    }

    /// Indices of connections leaving `node`
    pub fn outgoing(&self, node: &NodeId) -> &[usize] {
        self.outgoing_indices(node)
    }

    pub fn is_back_edge(&self, idx: usize) -> bool {
        self.back_edges.contains(&idx)
    }

    pub fn loops(&self) -> &[LoopInfo] {
        &self.loops
    }

    /// Region whose body contains `node`
    pub fn body_region(&self, node: &NodeId) -> Option<&LoopInfo> {
        self.body_of.get(node).map(|&idx| &self.loops[idx])
    }

    /// Region controlled by `node`
    pub fn controlled_region(&self, node: &NodeId) -> Option<&LoopInfo> {
        self.controller_of.get(node).map(|&idx| &self.loops[idx])
    }

    /// Ids read by graph input nodes
    pub fn graph_input_ids(&self) -> HashSet<&str> {
        self.resolved
            .values()
            .filter_map(|r| match &r.role {
                NodeRole::GraphInput(id) => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Check run-supplied initial inputs against the graph's inputs
    pub fn check_initial_inputs<'a>(
        &self,
        supplied: impl IntoIterator<Item = &'a String>,
    ) -> Result<(), ValidationError> {
        let known = self.graph_input_ids();
        let mut unknown: Vec<&String> = supplied
            .into_iter()
            .filter(|id| !known.contains(id.as_str()))
            .collect();
        unknown.sort();
        match unknown.first() {
            Some(id) => Err(ValidationError::UnknownGraphInput((*id).clone())),
            None => Ok(()),
        }
    }

    /// Graph output id for `node`, if it is a graph output
    pub fn graph_output_id(&self, node: &NodeId) -> Option<&str> {
        match self.role(node) {
            Some(NodeRole::GraphOutput(id)) => Some(id),
            _ => None,
        }
    }
}

fn check_connection(
    conn: &Connection,
    resolved: &HashMap<NodeId, Resolved>,
) -> Result<(), ValidationError> {
    let lookup = |id: &NodeId| {
        resolved.get(id).ok_or_else(|| ValidationError::UnknownNode {
            missing: id.clone(),
            referenced_by: format!("connection {}", conn),
        })
    };
    let source = lookup(&conn.source)?;
    let target = lookup(&conn.target)?;

    let source_port =
        source
            .ports
            .output(&conn.source_port)
            .ok_or_else(|| ValidationError::UnknownPort {
                node: conn.source.clone(),
                port: conn.source_port.clone(),
                direction: "output",
            })?;
    let target_port =
        target
            .ports
            .input(&conn.target_port)
            .ok_or_else(|| ValidationError::UnknownPort {
                node: conn.target.clone(),
                port: conn.target_port.clone(),
                direction: "input",
            })?;

    if !coercible(&source_port.data_type, &target_port.data_type) {
        return Err(ValidationError::IncompatibleTypes {
            source_node: conn.source.clone(),
            source_port: conn.source_port.clone(),
            target_node: conn.target.clone(),
            target_port: conn.target_port.clone(),
            source_type: source_port.data_type.clone(),
            target_type: target_port.data_type.clone(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::LoopRegion;
    use serde_json::json;

    fn math(id: &str) -> Node {
        Node::new(id, "math", json!({"operation": "+"}))
    }

    #[test]
    fn test_topological_order_breaks_ties_by_declaration() {
        let graph = Graph::new()
            .with_node(math("c"))
            .with_node(math("a"))
            .with_node(math("b"))
            .connect("a", "result", "c", "a")
            .connect("b", "result", "c", "b");

        let validated = graph.validate(&NodeRegistry::with_builtins()).unwrap();
        let order: Vec<&str> = validated.order().iter().map(NodeId::as_str).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_cycle_is_rejected() {
        let graph = Graph::new()
            .with_node(math("a"))
            .with_node(math("b"))
            .with_node(math("free"))
            .connect("a", "result", "b", "a")
            .connect("b", "result", "a", "a");

        match graph.validate(&NodeRegistry::with_builtins()) {
            Err(ValidationError::Cycle(nodes)) => {
                assert_eq!(nodes, vec![NodeId::new("a"), NodeId::new("b")]);
            }
            other => panic!("expected cycle, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_dangling_port_is_rejected() {
        let graph = Graph::new()
            .with_node(math("a"))
            .with_node(math("b"))
            .connect("a", "nope", "b", "a");
        assert!(matches!(
            graph.validate(&NodeRegistry::with_builtins()),
            Err(ValidationError::UnknownPort { direction: "output", .. })
        ));

        let graph = Graph::new()
            .with_node(math("a"))
            .connect("a", "result", "ghost", "a");
        assert!(matches!(
            graph.validate(&NodeRegistry::with_builtins()),
            Err(ValidationError::UnknownNode { .. })
        ));
    }

    #[test]
    fn test_duplicate_target_is_rejected() {
        let graph = Graph::new()
            .with_node(math("a"))
            .with_node(math("b"))
            .with_node(math("c"))
            .connect("a", "result", "c", "a")
            .connect("b", "result", "c", "a");
        assert!(matches!(
            graph.validate(&NodeRegistry::with_builtins()),
            Err(ValidationError::DuplicateTarget { .. })
        ));
    }

    #[test]
    fn test_duplicate_node_is_rejected() {
        let graph = Graph::new().with_node(math("a")).with_node(math("a"));
        assert_eq!(
            graph.validate(&NodeRegistry::with_builtins()).err(),
            Some(ValidationError::DuplicateNode(NodeId::new("a")))
        );
    }

    #[test]
    fn test_incompatible_types_are_rejected() {
        let graph = Graph::new()
            .with_node(Node::new(
                "obj",
                "graph_input",
                json!({"id": "o", "data_type": "object"}),
            ))
            .with_node(math("m"))
            .connect("obj", "value", "m", "a");
        assert!(matches!(
            graph.validate(&NodeRegistry::with_builtins()),
            Err(ValidationError::IncompatibleTypes { .. })
        ));
    }

    fn counting_loop() -> Graph {
        Graph::new()
            .with_node(Node::new("start", "graph_input", json!({"id": "start", "data_type": "number"})))
            .with_node(Node::new("loop", "loop_controller", json!({"accumulators": 1})))
            .with_node(Node::new("step", "math", json!({"operation": "+"})))
            .with_node(Node::new("one", "graph_input", json!({"id": "one", "data_type": "number"})))
            .with_node(Node::new("check", "compare", json!({"comparison": "<"})))
            .with_node(Node::new("limit", "graph_input", json!({"id": "limit", "data_type": "number"})))
            .with_node(Node::new("out", "graph_output", json!({"id": "total", "data_type": "number"})))
            .connect("start", "value", "loop", "default1")
            .connect("loop", "output1", "step", "a")
            .connect("one", "value", "step", "b")
            .connect("step", "result", "loop", "input1")
            .connect("step", "result", "check", "a")
            .connect("limit", "value", "check", "b")
            .connect("check", "result", "loop", "continue")
            .connect("loop", "result1", "out", "value")
            .with_loop(LoopRegion::new("loop"))
    }

    #[test]
    fn test_loop_back_edges_are_sanctioned() {
        let validated = counting_loop()
            .validate(&NodeRegistry::with_builtins())
            .unwrap();

        let region = validated.controlled_region(&NodeId::new("loop")).unwrap();
        let mut body: Vec<&str> = region.body.iter().map(NodeId::as_str).collect();
        body.sort();
        assert_eq!(body, vec!["check", "step"]);

        let back = (0..validated.graph().connections.len())
            .filter(|&i| validated.is_back_edge(i))
            .count();
        assert_eq!(back, 2);
        assert!(validated.body_region(&NodeId::new("out")).is_none());
    }

    #[test]
    fn test_same_cycle_without_loop_declaration_is_rejected() {
        let mut graph = counting_loop();
        graph.loops.clear();
        assert!(matches!(
            graph.validate(&NodeRegistry::with_builtins()),
            Err(ValidationError::Cycle(_))
        ));
    }

    #[test]
    fn test_loop_declaration_requires_controller_kind() {
        let graph = Graph::new()
            .with_node(math("a"))
            .with_loop(LoopRegion::new("a"));
        assert_eq!(
            graph.validate(&NodeRegistry::with_builtins()).err(),
            Some(ValidationError::NotALoopController(NodeId::new("a")))
        );
    }

    #[test]
    fn test_loop_without_back_edge_is_rejected() {
        let graph = Graph::new()
            .with_node(Node::new("loop", "loop_controller", json!({"accumulators": 1})))
            .with_loop(LoopRegion::new("loop"));
        assert_eq!(
            graph.validate(&NodeRegistry::with_builtins()).err(),
            Some(ValidationError::EmptyLoop(NodeId::new("loop")))
        );
    }

    fn controller(id: &str) -> Node {
        Node::new(id, "loop_controller", json!({"accumulators": 1}))
    }

    fn number_input(id: &str) -> Node {
        Node::new(id, "graph_input", json!({"id": id, "data_type": "number"}))
    }

    #[test]
    fn test_body_shared_by_two_loops_is_rejected() {
        let graph = Graph::new()
            .with_node(number_input("start"))
            .with_node(controller("outer"))
            .with_node(controller("inner"))
            .with_node(math("step"))
            .connect("start", "value", "outer", "default1")
            .connect("start", "value", "inner", "default1")
            .connect("outer", "output1", "step", "a")
            .connect("inner", "output1", "step", "b")
            .connect("step", "result", "outer", "input1")
            .connect("step", "result", "inner", "input1")
            .with_loop(LoopRegion::new("outer"))
            .with_loop(LoopRegion::new("inner"));

        assert_eq!(
            graph.validate(&NodeRegistry::with_builtins()).err(),
            Some(ValidationError::NestedLoop {
                outer: NodeId::new("outer"),
                inner: NodeId::new("inner"),
            })
        );
    }

    #[test]
    fn test_controller_inside_another_body_is_rejected() {
        let graph = Graph::new()
            .with_node(number_input("start"))
            .with_node(controller("outer"))
            .with_node(controller("inner"))
            .with_node(Node::new("work", "math", json!({"operation": "negate"})))
            .with_node(Node::new("back", "math", json!({"operation": "negate"})))
            .connect("start", "value", "outer", "default1")
            .connect("outer", "output1", "inner", "default1")
            .connect("inner", "output1", "work", "a")
            .connect("work", "result", "inner", "input1")
            .connect("inner", "result1", "back", "a")
            .connect("back", "result", "outer", "input1")
            .with_loop(LoopRegion::new("outer"))
            .with_loop(LoopRegion::new("inner"));

        assert_eq!(
            graph.validate(&NodeRegistry::with_builtins()).err(),
            Some(ValidationError::NestedLoop {
                outer: NodeId::new("outer"),
                inner: NodeId::new("inner"),
            })
        );
    }

    #[test]
    fn test_duplicate_graph_output_id_is_rejected() {
        let graph = Graph::new()
            .with_node(math("a"))
            .with_node(Node::new("o1", "graph_output", json!({"id": "same"})))
            .with_node(Node::new("o2", "graph_output", json!({"id": "same"})))
            .connect("a", "result", "o1", "value")
            .connect("a", "result", "o2", "value");

        assert_eq!(
            graph.validate(&NodeRegistry::with_builtins()).err(),
            Some(ValidationError::DuplicateGraphOutput {
                id: "same".to_string(),
                first: NodeId::new("o1"),
                second: NodeId::new("o2"),
            })
        );
    }

    #[test]
    fn test_initial_inputs_must_name_a_graph_input() {
        let graph = Graph::new()
            .with_node(number_input("x"))
            .with_node(math("m"))
            .connect("x", "value", "m", "a");
        let validated = graph.validate(&NodeRegistry::with_builtins()).unwrap();

        let known = ["x".to_string()];
        assert!(validated.check_initial_inputs(known.iter()).is_ok());

        let supplied = ["x".to_string(), "typo".to_string()];
        assert_eq!(
            validated.check_initial_inputs(supplied.iter()),
            Err(ValidationError::UnknownGraphInput("typo".to_string()))
        );
    }
}

//! Run state - per-node status, port deliveries, readiness and loop state
//!
//! The scheduler is owned by a single driver task, so every status and
//! delivery write is one committed transition: downstream readiness checks
//! never see half of a node's outputs.

use super::coerce::coerce;
use super::graph::{ErrorPolicy, NodeId};
use super::node::{Inputs, LoopSignal, Outputs, GRAPH_OUTPUT_PORT};
use super::validate::ValidatedGraph;
use super::value::{Slot, Value};
use crate::error::{NodeError, TypeMismatch};
use crate::run::NodeStatus;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// What a connection carried to its target port
#[derive(Debug, Clone)]
enum Delivery {
    Slot(Slot),
    /// The value could not be coerced to the target port's type
    Mismatch(TypeMismatch),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopPhase {
    /// Controller has not run yet
    Entry,
    /// Body nodes are executing the current pass
    Body,
    /// Body finished; controller decides again
    Reentry,
    Done,
}

#[derive(Debug)]
struct LoopState {
    iterations: u32,
    cap: u32,
    phase: LoopPhase,
}

/// How a node error was absorbed
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ErrorOutcome {
    /// The run must fail
    Escalated,
    /// The node errored, its dependents are skipped
    Isolated,
    /// Treated as success with substitute or absent outputs
    Recovered(Option<u32>),
}

/// Per-run scheduling state
pub(crate) struct Scheduler {
    graph: Arc<ValidatedGraph>,
    status: HashMap<NodeId, NodeStatus>,
    ready: VecDeque<NodeId>,
    running: HashSet<NodeId>,
    deliveries: HashMap<(NodeId, String), Delivery>,
    outputs: HashMap<NodeId, Outputs>,
    errors: HashMap<NodeId, NodeError>,
    isolated: HashSet<NodeId>,
    loops: HashMap<NodeId, LoopState>,
    skipped: Vec<NodeId>,
}

impl Scheduler {
    pub fn new(graph: Arc<ValidatedGraph>, max_loop_iterations: u32) -> Self {
        let status = graph
            .order()
            .iter()
            .map(|id| (id.clone(), NodeStatus::Pending))
            .collect();
        let loops = graph
            .loops()
            .iter()
            .map(|region| {
                let state = LoopState {
                    iterations: 0,
                    cap: region.max_iterations.unwrap_or(max_loop_iterations),
                    phase: LoopPhase::Entry,
                };
                (region.controller.clone(), state)
            })
            .collect();

        Self {
            graph,
            status,
            ready: VecDeque::new(),
            running: HashSet::new(),
            deliveries: HashMap::new(),
            outputs: HashMap::new(),
            errors: HashMap::new(),
            isolated: HashSet::new(),
            loops,
            skipped: Vec::new(),
        }
    }

    pub fn status(&self, node: &NodeId) -> NodeStatus {
        self.status
            .get(node)
            .copied()
            .unwrap_or(NodeStatus::Pending)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn error(&self, node: &NodeId) -> Option<&NodeError> {
        self.errors.get(node)
    }

    /// Present values from the node's last committed outputs
    pub fn committed_outputs(&self, node: &NodeId) -> HashMap<String, Value> {
        self.outputs
            .get(node)
            .map(Outputs::values)
            .unwrap_or_default()
    }

    /// Promote every node whose inputs have settled, to a fixed point.
    /// Returns the nodes skipped since the last call, in the order skipped.
    pub fn promote_ready(&mut self) -> Vec<NodeId> {
        loop {
            let mut changed = self.reenter_finished_loops();

            let graph = Arc::clone(&self.graph);
            for node in graph.order() {
                if self.status(node) != NodeStatus::Pending {
                    continue;
                }
                match self.readiness(node) {
                    Readiness::Waiting => {}
                    Readiness::Ready => {
                        self.status.insert(node.clone(), NodeStatus::Ready);
                        self.ready.push_back(node.clone());
                        changed = true;
                    }
                    Readiness::Excluded => {
                        self.skip(node);
                        changed = true;
                    }
                }
            }

            if !changed {
                break;
            }
        }
        std::mem::take(&mut self.skipped)
    }

    /// Next node to dispatch, FIFO by readiness; marks it running
    pub fn next_dispatch(&mut self) -> Option<NodeId> {
        let node = self.ready.pop_front()?;
        self.status.insert(node.clone(), NodeStatus::Running);
        self.running.insert(node.clone());
        Some(node)
    }

    /// Inputs for a dispatched node, with each port's delivery already coerced
    pub fn prepare_inputs(&self, node: &NodeId) -> Result<Inputs, NodeError> {
        let ports = self
            .graph
            .ports(node)
            .ok_or_else(|| NodeError::Internal(format!("no ports resolved for '{}'", node)))?;

        let mut inputs = Inputs::new();
        for port in &ports.inputs {
            match self.deliveries.get(&(node.clone(), port.id.clone())) {
                Some(Delivery::Mismatch(mismatch)) => {
                    return Err(NodeError::TypeMismatch(mismatch.clone()))
                }
                Some(Delivery::Slot(Slot::Present(value))) => {
                    inputs.insert(port.id.clone(), Arc::clone(value));
                }
                _ if port.required => return Err(NodeError::MissingInput(port.id.clone())),
                _ => {}
            }
        }
        Ok(inputs)
    }

    /// Pass count for the node's context
    pub fn iteration_of(&self, node: &NodeId) -> u32 {
        if let Some(state) = self.loops.get(node) {
            return state.iterations;
        }
        self.graph
            .body_region(node)
            .and_then(|region| self.loops.get(&region.controller))
            .map(|state| state.iterations.saturating_sub(1))
            .unwrap_or(0)
    }

    /// Commit a successful execution. For a loop controller this also applies
    /// its signal; `Ok(Some(n))` means pass `n` of its region was started.
    pub fn commit_success(
        &mut self,
        node: &NodeId,
        outputs: Outputs,
    ) -> Result<Option<u32>, NodeError> {
        let mut started_pass = None;

        if let Some(region) = self.graph.controlled_region(node) {
            let body = region.body.clone();
            let signal = outputs.signal().ok_or_else(|| {
                NodeError::Internal(format!("loop controller '{}' returned no signal", node))
            })?;
            let state = self
                .loops
                .get_mut(node)
                .ok_or_else(|| NodeError::Internal(format!("no loop state for '{}'", node)))?;

            match signal {
                LoopSignal::Continue => {
                    if state.iterations >= state.cap {
                        return Err(NodeError::LoopIterationLimitExceeded { limit: state.cap });
                    }
                    state.iterations += 1;
                    state.phase = LoopPhase::Body;
                    started_pass = Some(state.iterations);
                    self.reset_region(node, &body);
                }
                LoopSignal::Break => state.phase = LoopPhase::Done,
            }
        }

        self.running.remove(node);
        self.status.insert(node.clone(), NodeStatus::Succeeded);
        self.deliver(node, &outputs);
        self.outputs.insert(node.clone(), outputs);
        Ok(started_pass)
    }

    /// Record a success that arrived after the run halted. Nothing is
    /// delivered downstream and a loop signal does not start another pass.
    pub fn commit_after_halt(&mut self, node: &NodeId, outputs: Outputs) {
        self.running.remove(node);
        self.status.insert(node.clone(), NodeStatus::Succeeded);
        self.outputs.insert(node.clone(), outputs);
    }

    /// Apply the node's error policy to a failed execution
    pub fn commit_error(
        &mut self,
        node: &NodeId,
        error: NodeError,
        policy: &ErrorPolicy,
    ) -> ErrorOutcome {
        let is_controller = self.loops.contains_key(node);
        let recovered = match policy {
            ErrorPolicy::Escalate | ErrorPolicy::Isolate => None,
            ErrorPolicy::Substitute(values) => Some(Outputs::from_values(values)),
            ErrorPolicy::Ignore => Some(Outputs::new()),
        };

        if let Some(mut outputs) = recovered {
            if is_controller {
                outputs = outputs.with_signal(LoopSignal::Break);
            }
            self.errors.insert(node.clone(), error);
            if let Ok(pass) = self.commit_success(node, outputs) {
                return ErrorOutcome::Recovered(pass);
            }
            return self.mark_errored(node);
        }

        self.errors.insert(node.clone(), error);
        if matches!(policy, ErrorPolicy::Isolate) {
            self.mark_errored(node);
            self.isolated.insert(node.clone());
            let excluded = self.all_excluded(node);
            self.deliver(node, &excluded);
            self.outputs.insert(node.clone(), excluded);
            if is_controller {
                self.close_region(node);
            }
            return ErrorOutcome::Isolated;
        }
        self.mark_errored(node)
    }

    /// A running node stopped because the run was cancelled
    pub fn mark_interrupted(&mut self, node: &NodeId) {
        self.running.remove(node);
        self.status.insert(node.clone(), NodeStatus::Interrupted);
    }

    /// Nodes that never started become interrupted
    pub fn interrupt_pending(&mut self) -> Vec<NodeId> {
        self.ready.clear();
        self.drain_status(NodeStatus::Interrupted)
    }

    /// Nodes left waiting once nothing else can run are skipped
    pub fn skip_stranded(&mut self) -> Vec<NodeId> {
        self.drain_status(NodeStatus::Skipped)
    }

    /// Final values of graph outputs that committed
    pub fn final_outputs(&self) -> HashMap<String, Value> {
        self.graph
            .order()
            .iter()
            .filter(|node| self.status(node) == NodeStatus::Succeeded)
            .filter_map(|node| {
                let id = self.graph.graph_output_id(node)?;
                let value = self.outputs.get(node)?.get(GRAPH_OUTPUT_PORT)?;
                Some((id.to_string(), value.clone()))
            })
            .collect()
    }

    fn readiness(&self, node: &NodeId) -> Readiness {
        let body_of = self.graph.body_region(node).map(|r| &r.controller);
        let own_phase = self.loops.get(node).map(|state| state.phase);

        if let Some(controller) = body_of {
            if self.phase(controller) != Some(LoopPhase::Body) {
                return Readiness::Waiting;
            }
        }
        match own_phase {
            Some(LoopPhase::Entry) | Some(LoopPhase::Reentry) | None => {}
            Some(_) => return Readiness::Waiting,
        }

        let ports = self.graph.ports(node);
        let mut considered = 0;
        let mut excluded = 0;
        let mut required_excluded = false;
        for &idx in self.graph.incoming(node) {
            if own_phase == Some(LoopPhase::Entry) && self.graph.is_back_edge(idx) {
                continue;
            }
            let conn = self.graph.connection(idx);

            // Consumers outside a region only see its final pass
            if let Some(controller) = self.region_of_source(&conn.source) {
                let inside = body_of == Some(controller) || node == controller;
                if !inside && self.phase(controller) != Some(LoopPhase::Done) {
                    return Readiness::Waiting;
                }
            }

            match self
                .deliveries
                .get(&(node.clone(), conn.target_port.clone()))
            {
                None => return Readiness::Waiting,
                Some(Delivery::Slot(Slot::Excluded)) => {
                    excluded += 1;
                    required_excluded |= ports
                        .and_then(|ports| ports.input(&conn.target_port))
                        .is_some_and(|port| port.required);
                }
                Some(_) => {}
            }
            considered += 1;
        }

        // A required port fed only by a branch not taken can never get a value
        if required_excluded || (considered > 0 && excluded == considered) {
            Readiness::Excluded
        } else {
            Readiness::Ready
        }
    }

    /// Controller of the region a source node belongs to, as body or controller
    fn region_of_source(&self, source: &NodeId) -> Option<&NodeId> {
        if self.loops.contains_key(source) {
            return self
                .graph
                .controlled_region(source)
                .map(|region| &region.controller);
        }
        self.graph.body_region(source).map(|region| &region.controller)
    }

    fn phase(&self, controller: &NodeId) -> Option<LoopPhase> {
        self.loops.get(controller).map(|state| state.phase)
    }

    /// Regions whose body has settled go back to their controller
    fn reenter_finished_loops(&mut self) -> bool {
        let mut changed = false;
        let graph = Arc::clone(&self.graph);
        for region in graph.loops() {
            if self.phase(&region.controller) != Some(LoopPhase::Body) {
                continue;
            }
            let settled = region
                .body
                .iter()
                .all(|node| self.status(node).is_terminal());
            if !settled {
                continue;
            }
            if let Some(state) = self.loops.get_mut(&region.controller) {
                state.phase = LoopPhase::Reentry;
            }
            self.status
                .insert(region.controller.clone(), NodeStatus::Pending);
            log::debug!(
                "Loop {} pass {} settled",
                region.controller,
                self.iteration_of(&region.controller)
            );
            changed = true;
        }
        changed
    }

    /// Body nodes go back to pending and every delivery produced inside the
    /// region is dropped before the controller delivers again.
    fn reset_region(&mut self, controller: &NodeId, body: &HashSet<NodeId>) {
        for node in body {
            self.status.insert(node.clone(), NodeStatus::Pending);
            self.outputs.remove(node);
            self.isolated.remove(node);
        }
        let graph = Arc::clone(&self.graph);
        self.deliveries.retain(|(target, port), _| {
            let source = graph
                .incoming(target)
                .iter()
                .map(|&idx| graph.connection(idx))
                .find(|conn| &conn.target_port == port)
                .map(|conn| &conn.source);
            !matches!(source, Some(s) if s == controller || body.contains(s))
        });
    }

    fn skip(&mut self, node: &NodeId) {
        self.status.insert(node.clone(), NodeStatus::Skipped);
        self.skipped.push(node.clone());
        let excluded = self.all_excluded(node);
        self.deliver(node, &excluded);
        self.outputs.insert(node.clone(), excluded);
        if self.loops.contains_key(node) {
            self.close_region(node);
        }
    }

    /// The loop will not run again; anything in its body still waiting is skipped
    fn close_region(&mut self, controller: &NodeId) {
        if let Some(state) = self.loops.get_mut(controller) {
            state.phase = LoopPhase::Done;
        }
        let graph = Arc::clone(&self.graph);
        if let Some(region) = graph.controlled_region(controller) {
            for node in graph.order() {
                if region.body.contains(node) && self.status(node) == NodeStatus::Pending {
                    self.skip(node);
                }
            }
        }
    }

    fn mark_errored(&mut self, node: &NodeId) -> ErrorOutcome {
        self.running.remove(node);
        self.status.insert(node.clone(), NodeStatus::Errored);
        ErrorOutcome::Escalated
    }

    fn all_excluded(&self, node: &NodeId) -> Outputs {
        self.graph
            .ports(node)
            .map(|ports| Outputs::all_excluded(&ports.outputs))
            .unwrap_or_default()
    }

    /// Coerce each output to every consumer's port type and store it
    fn deliver(&mut self, node: &NodeId, outputs: &Outputs) {
        let graph = Arc::clone(&self.graph);
        for &idx in graph.outgoing(node) {
            let conn = graph.connection(idx);
            let target_type = graph
                .ports(&conn.target)
                .and_then(|ports| ports.input(&conn.target_port))
                .map(|port| &port.data_type);

            let delivery = match (outputs.slot(&conn.source_port), target_type) {
                (Slot::Present(value), Some(target)) if !value.conforms_to(target) => {
                    match coerce(&value, target, &conn.target_port) {
                        Ok(coerced) => Delivery::Slot(Slot::present(coerced)),
                        Err(mismatch) => Delivery::Mismatch(mismatch),
                    }
                }
                (slot, _) => Delivery::Slot(slot),
            };
            self.deliveries
                .insert((conn.target.clone(), conn.target_port.clone()), delivery);
        }
    }

    fn drain_status(&mut self, to: NodeStatus) -> Vec<NodeId> {
        let graph = Arc::clone(&self.graph);
        let mut drained = Vec::new();
        for node in graph.order() {
            if matches!(self.status(node), NodeStatus::Pending | NodeStatus::Ready) {
                self.status.insert(node.clone(), to);
                drained.push(node.clone());
            }
        }
        drained
    }
}

enum Readiness {
    Waiting,
    Ready,
    /// Every incoming delivery, or one feeding a required port, is a branch
    /// not taken
    Excluded,
}

//! Graph executor - dispatches ready nodes onto the tokio runtime
//!
//! A run is driven by one task that owns the [`Scheduler`]. Node
//! `process` calls are spawned into a `JoinSet`; their results come back
//! to the driver, which commits them, applies error policy and promotes
//! the next wave of ready nodes.

use super::cancel::CancellationToken;
use super::graph::{Graph, NodeId};
use super::node::{NodeContext, Outputs};
use super::registry::NodeRegistry;
use super::scheduler::{ErrorOutcome, Scheduler};
use super::validate::ValidatedGraph;
use super::value::Value;
use crate::config::RunConfig;
use crate::error::{NodeError, RunError, ValidationError};
use crate::events::{EngineEvent, EventReceiver, EventStream};
use crate::run::{NodeRecord, NodeStatus, RunId, RunLog, RunResult, RunStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::{self, JoinSet};

/// Runs graphs against a node registry
pub struct Executor {
    registry: Arc<NodeRegistry>,
    events: Arc<EventStream>,
    next_run: AtomicU64,
}

impl Executor {
    pub fn new(registry: NodeRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            events: Arc::new(EventStream::new()),
            next_run: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Observe events from every run of this executor
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn validate(&self, graph: &Graph) -> Result<ValidatedGraph, ValidationError> {
        graph.validate(&self.registry)
    }

    /// Validate `graph` and create a run for it. No run exists if validation fails.
    pub fn prepare(&self, graph: &Graph, config: RunConfig) -> Result<Run, ValidationError> {
        let validated = self
            .validate(graph)
            .and_then(|validated| {
                validated.check_initial_inputs(config.initial_inputs.keys())?;
                Ok(validated)
            })
            .map_err(|e| {
                log::warn!("Graph rejected: {}", e);
                e
            })?;
        let id = RunId(self.next_run.fetch_add(1, Ordering::Relaxed));
        Ok(Run {
            id,
            graph: Arc::new(validated),
            config,
            cancel: CancellationToken::new(),
            events: Arc::new(EventStream::child(Arc::clone(&self.events))),
        })
    }

    /// Validate and run to completion
    pub async fn execute(
        &self,
        graph: &Graph,
        config: RunConfig,
    ) -> Result<RunResult, ValidationError> {
        Ok(self.prepare(graph, config)?.execute().await)
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(NodeRegistry::with_builtins())
    }
}

/// A validated graph bound to its own cancellation scope and event stream
pub struct Run {
    id: RunId,
    graph: Arc<ValidatedGraph>,
    config: RunConfig,
    cancel: CancellationToken,
    events: Arc<EventStream>,
}

impl Run {
    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn graph(&self) -> &ValidatedGraph {
        &self.graph
    }

    /// Events of this run only. Subscribe before `execute` to see all of them.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    /// Handle for cancelling the run from elsewhere
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn execute(self) -> RunResult {
        Driver::new(self).run().await
    }
}

type NodeOutcome = Result<Outputs, NodeError>;

enum Wake {
    Cancelled,
    Joined(Option<Result<(task::Id, NodeOutcome), task::JoinError>>),
}

struct Driver {
    run_id: RunId,
    graph: Arc<ValidatedGraph>,
    scheduler: Scheduler,
    cancel: CancellationToken,
    events: Arc<EventStream>,
    graph_inputs: Arc<HashMap<String, Value>>,
    slots: usize,
    tasks: JoinSet<NodeOutcome>,
    task_nodes: HashMap<task::Id, NodeId>,
    log: RunLog,
    /// Set once the run stops dispatching
    halted: bool,
    escalated: Option<RunError>,
    isolated: Option<RunError>,
}

impl Driver {
    fn new(run: Run) -> Self {
        let scheduler = Scheduler::new(Arc::clone(&run.graph), run.config.max_loop_iterations);
        Self {
            run_id: run.id,
            slots: run.config.worker_slots(),
            graph_inputs: Arc::new(run.config.initial_inputs),
            graph: run.graph,
            scheduler,
            cancel: run.cancel,
            events: run.events,
            tasks: JoinSet::new(),
            task_nodes: HashMap::new(),
            log: RunLog::default(),
            halted: false,
            escalated: None,
            isolated: None,
        }
    }

    async fn run(mut self) -> RunResult {
        let started_at = Utc::now();
        log::info!(
            "Starting {} ({} nodes)",
            self.run_id,
            self.graph.order().len()
        );
        self.events.emit(EngineEvent::GraphStarted {
            run_id: self.run_id,
        });

        if self.cancel.is_cancelled() {
            self.halt();
        } else {
            self.pump();
        }

        while !self.tasks.is_empty() {
            let wake = tokio::select! {
                biased;
                _ = self.cancel.cancelled(), if !self.halted => Wake::Cancelled,
                joined = self.tasks.join_next_with_id() => Wake::Joined(joined),
            };

            match wake {
                Wake::Cancelled => {
                    log::info!("{} cancelled", self.run_id);
                    self.halt();
                }
                Wake::Joined(Some(Ok((id, outcome)))) => {
                    if let Some(node) = self.task_nodes.remove(&id) {
                        self.complete(node, outcome);
                    }
                }
                Wake::Joined(Some(Err(e))) => {
                    if let Some(node) = self.task_nodes.remove(&e.id()) {
                        log::error!("Node {} task failed: {}", node, e);
                        self.complete(node, Err(NodeError::Internal(e.to_string())));
                    }
                }
                Wake::Joined(None) => break,
            }

            if !self.halted {
                self.pump();
            }
        }

        self.finish(started_at)
    }

    /// Promote and dispatch until every worker slot is busy or nothing is ready
    fn pump(&mut self) {
        loop {
            if self.cancel.is_cancelled() {
                self.halt();
                return;
            }
            for node in self.scheduler.promote_ready() {
                log::debug!("Node {} skipped", node);
                self.events.emit(EngineEvent::NodeSkipped {
                    run_id: self.run_id,
                    node_id: node,
                });
            }

            let mut settled_inline = false;
            while !self.halted && self.scheduler.running_count() < self.slots {
                if self.cancel.is_cancelled() {
                    self.halt();
                    return;
                }
                let Some(node) = self.scheduler.next_dispatch() else {
                    break;
                };
                settled_inline |= !self.dispatch(node);
            }

            if self.halted || !settled_inline {
                return;
            }
        }
    }

    /// Start `node`. Returns false when it failed before being spawned.
    fn dispatch(&mut self, node: NodeId) -> bool {
        log::debug!("Dispatching node {}", node);
        self.log.start_node(&node);
        self.events.emit(EngineEvent::NodeStarted {
            run_id: self.run_id,
            node_id: node.clone(),
        });

        let prepared = self.scheduler.prepare_inputs(&node).and_then(|inputs| {
            let kind = self
                .graph
                .kind(&node)
                .ok_or_else(|| NodeError::Internal(format!("no kind resolved for '{}'", node)))?;
            let config = self
                .graph
                .node(&node)
                .map(|n| n.config.clone())
                .unwrap_or_default();
            Ok((kind, config, inputs))
        });

        match prepared {
            Ok((kind, config, inputs)) => {
                let ctx = NodeContext::new(
                    self.run_id,
                    node.clone(),
                    self.scheduler.iteration_of(&node),
                    self.cancel.clone(),
                    Arc::clone(&self.graph_inputs),
                    Arc::clone(&self.events),
                );
                let handle = self
                    .tasks
                    .spawn(async move { kind.process(&config, inputs, &ctx).await });
                self.task_nodes.insert(handle.id(), node);
                true
            }
            Err(error) => {
                self.fail(node, error);
                false
            }
        }
    }

    fn complete(&mut self, node: NodeId, outcome: NodeOutcome) {
        if self.halted {
            self.complete_after_halt(node, outcome);
            return;
        }

        match outcome {
            Ok(outputs) => {
                let produced = outputs.values();
                match self.scheduler.commit_success(&node, outputs) {
                    Ok(pass) => self.finished(node, produced, pass),
                    Err(error) => self.fail(node, error),
                }
            }
            Err(error) => self.fail(node, error),
        }
    }

    /// Work that returns after the run stopped keeps a success, anything
    /// else is an interruption. Loop signals are no longer acted on.
    fn complete_after_halt(&mut self, node: NodeId, outcome: NodeOutcome) {
        if let Ok(outputs) = outcome {
            let produced = outputs.values();
            self.scheduler.commit_after_halt(&node, outputs);
            self.finished(node, produced, None);
            return;
        }
        log::debug!("Node {} interrupted", node);
        self.scheduler.mark_interrupted(&node);
        self.log.end_node(&node, NodeStatus::Interrupted);
        self.events.emit(EngineEvent::NodeInterrupted {
            run_id: self.run_id,
            node_id: node,
        });
    }

    fn finished(&mut self, node: NodeId, outputs: HashMap<String, Value>, pass: Option<u32>) {
        log::debug!("Node {} finished", node);
        self.log.end_node(&node, NodeStatus::Succeeded);
        self.events.emit(EngineEvent::NodeFinished {
            run_id: self.run_id,
            node_id: node.clone(),
            outputs,
        });
        if let Some(iteration) = pass {
            log::debug!("Loop {} starting pass {}", node, iteration);
            self.events.emit(EngineEvent::LoopIteration {
                run_id: self.run_id,
                controller: node,
                iteration,
            });
        }
    }

    fn fail(&mut self, node: NodeId, error: NodeError) {
        let policy = self
            .graph
            .node(&node)
            .map(|n| n.error_policy.clone())
            .unwrap_or_default();
        let run_error = RunError::from_node(&node, &error);

        match self.scheduler.commit_error(&node, error, &policy) {
            ErrorOutcome::Recovered(pass) => {
                log::warn!("{} (recovered by policy)", run_error);
                let outputs = self.scheduler.committed_outputs(&node);
                self.finished(node, outputs, pass);
            }
            outcome => {
                log::error!("{}", run_error);
                self.log.end_node(&node, NodeStatus::Errored);
                self.events.emit(EngineEvent::NodeErrored {
                    run_id: self.run_id,
                    node_id: node,
                    error: run_error.clone(),
                });
                if outcome == ErrorOutcome::Isolated {
                    self.isolated.get_or_insert(run_error);
                } else {
                    self.escalated.get_or_insert(run_error);
                    self.halt();
                }
            }
        }
    }

    /// Stop dispatching: signal running nodes, interrupt everything not started
    fn halt(&mut self) {
        if self.halted {
            return;
        }
        self.halted = true;
        self.cancel.cancel();
        self.interrupt_pending();
    }

    fn interrupt_pending(&mut self) {
        for node in self.scheduler.interrupt_pending() {
            self.events.emit(EngineEvent::NodeInterrupted {
                run_id: self.run_id,
                node_id: node,
            });
        }
    }

    fn finish(mut self, started_at: chrono::DateTime<Utc>) -> RunResult {
        if self.halted {
            self.interrupt_pending();
        } else {
            for node in self.scheduler.skip_stranded() {
                log::warn!("Node {} never became ready", node);
                self.events.emit(EngineEvent::NodeSkipped {
                    run_id: self.run_id,
                    node_id: node,
                });
            }
        }

        let status = match (self.escalated.take(), self.halted, self.isolated.take()) {
            (Some(error), _, _) => RunStatus::Failed(error),
            (None, true, _) => RunStatus::Interrupted,
            (None, false, Some(error)) => RunStatus::Failed(error),
            (None, false, None) => RunStatus::Succeeded,
        };
        let outputs = self.scheduler.final_outputs();

        match &status {
            RunStatus::Succeeded => log::info!("{} succeeded", self.run_id),
            RunStatus::Failed(error) => log::warn!("{} failed: {}", self.run_id, error),
            RunStatus::Interrupted => log::info!("{} interrupted", self.run_id),
        }
        self.events.emit(EngineEvent::GraphFinished {
            run_id: self.run_id,
            status: status.clone(),
            outputs: outputs.clone(),
        });

        let graph = Arc::clone(&self.graph);
        let nodes = graph
            .order()
            .iter()
            .map(|id| {
                let record = NodeRecord {
                    status: self.scheduler.status(id),
                    runs: self.log.take(id),
                    error: self
                        .scheduler
                        .error(id)
                        .map(|e| RunError::from_node(id, e)),
                    outputs: self.scheduler.committed_outputs(id),
                };
                (id.clone(), record)
            })
            .collect();

        RunResult {
            run_id: self.run_id,
            status,
            outputs,
            nodes,
            started_at,
            ended_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::graph::Node;
    use serde_json::json;

    fn chain() -> Graph {
        Graph::new()
            .with_node(Node::new("a", "math", json!({"operation": "negate"})))
            .with_node(Node::new("b", "math", json!({"operation": "negate"})))
            .connect("a", "result", "b", "a")
    }

    #[tokio::test]
    async fn test_pump_starts_nothing_once_cancelled() {
        let run = Executor::default()
            .prepare(&chain(), RunConfig::new())
            .unwrap();
        let token = run.cancel_token();
        let mut driver = Driver::new(run);

        // Cancelled between a completion and the next dispatch pass
        token.cancel();
        driver.pump();

        assert!(driver.halted);
        assert!(driver.tasks.is_empty());
        assert_eq!(driver.scheduler.status(&NodeId::new("a")), NodeStatus::Interrupted);
        assert_eq!(driver.scheduler.status(&NodeId::new("b")), NodeStatus::Interrupted);
        assert!(driver.log.take(&NodeId::new("a")).is_empty());
    }
}

mod common;

use common::*;
use nodeflow::{EngineEvent, ErrorKind, Graph, Node, NodeStatus, RunConfig, RunStatus};
use serde_json::json;
use std::time::Duration;

/// `b` depends on `a`
fn chain(a: Node) -> Graph {
    Graph::new()
        .with_node(a)
        .with_node(math("b", "negate"))
        .connect("a", "out", "b", "a")
}

#[tokio::test]
async fn test_cancel_while_upstream_runs() {
    let executor = executor();
    let run = executor
        .prepare(&chain(slow("a", 10_000)), RunConfig::new())
        .unwrap();
    let token = run.cancel_token();
    let mut rx = run.subscribe();
    let handle = tokio::spawn(run.execute());

    wait_for_start(&mut rx, "a").await;
    token.cancel();
    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("run should stop promptly")
        .unwrap();

    assert_eq!(result.status, RunStatus::Interrupted);
    let a = result.node_status("a").unwrap();
    assert!(matches!(a, NodeStatus::Succeeded | NodeStatus::Interrupted));
    assert_eq!(result.node_status("b"), Some(NodeStatus::Interrupted));
    assert_eq!(result.executions("b"), 0);

    let events = drain(&mut rx);
    assert!(!started(&events).contains(&"b".to_string()));
    assert!(matches!(
        events.last(),
        Some(EngineEvent::GraphFinished { status: RunStatus::Interrupted, .. })
    ));
}

#[tokio::test]
async fn test_node_finishing_after_cancel_keeps_success() {
    let a = Node::new("a", "slow", json!({"millis": 50, "ignore_cancel": true}));
    let executor = executor();
    let run = executor.prepare(&chain(a), RunConfig::new()).unwrap();
    let token = run.cancel_token();
    let mut rx = run.subscribe();
    let handle = tokio::spawn(run.execute());

    wait_for_start(&mut rx, "a").await;
    token.cancel();
    let result = handle.await.unwrap();

    assert_eq!(result.status, RunStatus::Interrupted);
    assert_eq!(result.node_status("a"), Some(NodeStatus::Succeeded));
    assert_eq!(result.node_status("b"), Some(NodeStatus::Interrupted));
}

#[tokio::test]
async fn test_cancel_before_start_runs_nothing() {
    let executor = executor();
    let run = executor
        .prepare(&chain(slow("a", 10)), RunConfig::new())
        .unwrap();
    run.cancel();
    let mut rx = run.subscribe();
    let result = run.execute().await;

    assert_eq!(result.status, RunStatus::Interrupted);
    assert_eq!(result.node_status("a"), Some(NodeStatus::Interrupted));
    assert_eq!(result.node_status("b"), Some(NodeStatus::Interrupted));
    assert!(started(&drain(&mut rx)).is_empty());
}

#[tokio::test]
async fn test_escalated_error_cancels_running_siblings() {
    let graph = Graph::new()
        .with_node(slow("sibling", 10_000))
        .with_node(Node::new("boom", "fail", serde_json::Value::Null))
        .with_node(math("after", "negate"))
        .connect("sibling", "out", "after", "a");

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        executor().execute(&graph, RunConfig::new()),
    )
    .await
    .expect("sibling should observe cancellation")
    .unwrap();

    let error = result.error().unwrap();
    assert_eq!(error.kind, ErrorKind::NodeProcessing);
    assert_eq!(error.node_id.as_str(), "boom");
    assert_eq!(result.node_status("sibling"), Some(NodeStatus::Interrupted));
    assert_eq!(result.node_status("after"), Some(NodeStatus::Interrupted));
}

#[test]
fn test_token_shared_across_clones() {
    let executor = executor();
    let run = executor
        .prepare(&chain(slow("a", 10)), RunConfig::new())
        .unwrap();
    let token = run.cancel_token();
    assert!(!token.is_cancelled());

    run.cancel();
    assert!(token.is_cancelled());
    tokio_test::block_on(token.cancelled());
}

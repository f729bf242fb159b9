//! Node kind registry - maps a kind string to its implementation

use super::graph::Node;
use super::node::{NodeKind, NodePorts};
use crate::error::ValidationError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Registry of node kinds, with port sets cached per configuration snapshot
pub struct NodeRegistry {
    kinds: HashMap<String, Arc<dyn NodeKind>>,
    /// Keyed by (kind, canonical config text)
    port_cache: Mutex<HashMap<(String, String), Arc<NodePorts>>>,
}

impl NodeRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
            port_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Registry preloaded with the built-in kinds
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for kind in crate::nodes::builtin_kinds() {
            registry.register_arc(kind);
        }
        registry
    }

    pub fn register(&mut self, kind: impl NodeKind + 'static) {
        self.register_arc(Arc::new(kind));
    }

    /// Register (or replace) a kind. Cached ports for that kind are dropped.
    pub fn register_arc(&mut self, kind: Arc<dyn NodeKind>) {
        let name = kind.kind().to_string();
        log::debug!("Registering node kind: {}", name);
        self.port_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(cached_kind, _), _| cached_kind != &name);
        self.kinds.insert(name, kind);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeKind>> {
        self.kinds.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Registered kind names, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Default node of `kind`, if registered
    pub fn create_default(&self, kind: &str, id: &str) -> Option<Node> {
        self.kinds.get(kind).map(|k| k.create_default(id))
    }

    /// Port set for `node`'s current configuration
    pub fn ports(&self, node: &Node) -> Result<Arc<NodePorts>, ValidationError> {
        let kind = self
            .kinds
            .get(&node.kind)
            .ok_or_else(|| ValidationError::UnknownKind {
                node: node.id.clone(),
                kind: node.kind.clone(),
            })?;

        let key = (node.kind.clone(), node.config.to_string());
        if let Some(ports) = self
            .port_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Ok(Arc::clone(ports));
        }

        let invalid = |e: crate::error::NodeError| ValidationError::InvalidConfig {
            node: node.id.clone(),
            message: e.to_string(),
        };
        let ports = Arc::new(NodePorts {
            inputs: kind.input_ports(&node.config).map_err(invalid)?,
            outputs: kind.output_ports(&node.config).map_err(invalid)?,
        });

        self.port_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, Arc::clone(&ports));
        Ok(ports)
    }

    /// Number of cached port snapshots
    pub fn cached_port_sets(&self) -> usize {
        self.port_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtins_registered() {
        let registry = NodeRegistry::with_builtins();
        for kind in ["math", "graph_input", "graph_output", "loop_controller", "compare", "if"] {
            assert!(registry.contains(kind), "missing {}", kind);
        }
        assert!(registry.create_default("math", "m").is_some());
        assert!(registry.create_default("nope", "m").is_none());
    }

    #[test]
    fn test_ports_recomputed_on_reconfigure() {
        let registry = NodeRegistry::with_builtins();
        let mut node = Node::new("m", "math", json!({"operation": "+"}));

        let binary = registry.ports(&node).unwrap();
        assert!(binary.input("b").unwrap().required);
        assert!(binary.input("operation").is_none());

        // Same snapshot comes from the cache
        let again = registry.ports(&node).unwrap();
        assert!(Arc::ptr_eq(&binary, &again));
        assert_eq!(registry.cached_port_sets(), 1);

        node.reconfigure(json!({"operation": "+", "use_operation_input": true}));
        let dynamic = registry.ports(&node).unwrap();
        assert!(dynamic.input("operation").is_some());
        assert!(!dynamic.input("b").unwrap().required);
        assert_eq!(registry.cached_port_sets(), 2);

        // The old snapshot is untouched
        assert!(binary.input("operation").is_none());
    }

    #[test]
    fn test_unknown_kind() {
        let registry = NodeRegistry::new();
        let node = Node::new("x", "mystery", json!(null));
        assert!(matches!(
            registry.ports(&node),
            Err(ValidationError::UnknownKind { .. })
        ));
    }

    #[test]
    fn test_invalid_config() {
        let registry = NodeRegistry::with_builtins();
        let node = Node::new("m", "math", json!({"operation": "sqrt"}));
        assert!(matches!(
            registry.ports(&node),
            Err(ValidationError::InvalidConfig { .. })
        ));
    }
}

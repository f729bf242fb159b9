//! Run configuration - concurrency, loop caps and initial inputs

use crate::core::Value;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_MAX_LOOP_ITERATIONS: u32 = 100;

fn default_max_loop_iterations() -> u32 {
    DEFAULT_MAX_LOOP_ITERATIONS
}

/// Per-run settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Maximum nodes running at once; `None` means no cap
    #[serde(default)]
    pub concurrency_limit: Option<usize>,

    /// Iteration cap for loop regions without their own
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: u32,

    /// Values for graph inputs, by graph input id
    #[serde(default)]
    pub initial_inputs: HashMap<String, Value>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: None,
            max_loop_iterations: DEFAULT_MAX_LOOP_ITERATIONS,
            initial_inputs: HashMap::new(),
        }
    }
}

impl RunConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run config: {}", path.display()))?;
        Self::from_yaml_str(&content)
            .with_context(|| format!("Failed to parse run config: {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: RunConfig = serde_yaml::from_str(content)?;
        log::debug!(
            "Loaded run config: limit={:?}, max_loop_iterations={}, {} inputs",
            config.concurrency_limit,
            config.max_loop_iterations,
            config.initial_inputs.len()
        );
        Ok(config)
    }

    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = Some(limit);
        self
    }

    pub fn with_max_loop_iterations(mut self, max: u32) -> Self {
        self.max_loop_iterations = max;
        self
    }

    pub fn with_input(mut self, id: impl Into<String>, value: Value) -> Self {
        self.initial_inputs.insert(id.into(), value);
        self
    }

    /// Worker slots for dispatch
    pub(crate) fn worker_slots(&self) -> usize {
        self.concurrency_limit.unwrap_or(usize::MAX).max(1)
    }
}

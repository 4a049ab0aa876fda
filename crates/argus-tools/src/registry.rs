//! Thread-safe tool registry.
//!
//! Tools are stored as `Arc<dyn Tool>` behind an `RwLock` so lookups and
//! registration work from any task without holding the lock during
//! execution.

use crate::{Tool, ToolSpec};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

const MAX_TOOL_NAME_LEN: usize = 64;

fn validate_tool_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("tool name must not be empty".to_string());
    }
    if name.len() > MAX_TOOL_NAME_LEN {
        return Err(format!(
            "tool name exceeds maximum length of {MAX_TOOL_NAME_LEN} characters: {name}"
        ));
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!(
            "tool name must contain only alphanumeric characters and underscores: {name}"
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a tool. Rejects duplicate and invalid names.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), String> {
        let name = tool.spec().name.to_string();
        validate_tool_name(&name)?;

        let mut map = self
            .tools
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if map.contains_key(&name) {
            return Err(format!("tool already registered: {name}"));
        }
        map.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let map = self
            .tools
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.get(name).cloned()
    }

    /// All registered specs, sorted by name for deterministic output.
    pub fn list_specs(&self) -> Vec<ToolSpec> {
        let map = self
            .tools
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut specs: Vec<ToolSpec> = map.values().map(|t| t.spec().clone()).collect();
        specs.sort_by(|a, b| a.name.cmp(b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.tools
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Thread-safe tool registry.
//!
//! Tools are stored as `Arc<dyn Tool>` behind an `Arc<RwLock<...>>` so
//! they can be registered at init and looked up from any task without
//! holding the lock during execution. MCP tools registered at runtime go
//! through the same path as the built-ins.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use vigil_types::ToolSpec;

use crate::definition::{validate_input_schema, validate_tool_name, Tool};

/// A shared registry of tool implementations.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Rejects duplicate names, invalid names, and
    /// invalid input schemas.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), String> {
        let name = tool.name().to_string();
        validate_tool_name(&name)?;
        validate_input_schema(&tool.input_schema())?;

        let mut map = self
            .tools
            .write()
            .map_err(|e| format!("registry lock poisoned: {e}"))?;
        if map.contains_key(&name) {
            return Err(format!("tool already registered: {name}"));
        }
        map.insert(name, tool);
        Ok(())
    }

    /// Remove a tool (e.g. when an MCP server disconnects).
    pub fn unregister(&self, name: &str) -> bool {
        self.tools
            .write()
            .map(|mut map| map.remove(name).is_some())
            .unwrap_or(false)
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let map = self.tools.read().ok()?;
        map.get(name).cloned()
    }

    /// Specs for every registered tool, sorted by name for deterministic
    /// provider payloads.
    pub fn list_specs(&self) -> Vec<ToolSpec> {
        let map = self.tools.read().expect("registry lock poisoned");
        let mut specs: Vec<ToolSpec> = map
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.tools.read().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

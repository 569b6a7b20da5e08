//! Safety classification for tool invocations with configurable overrides.
//!
//! Every tool call is classified into one of three tiers before execution.
//! Operators can layer [`SafetyOverrides`] to promote or demote specific
//! tools; everything else falls back to the name-prefix rule.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Three-tier safety classification, ordered from least to most dangerous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    /// Read-only, no side effects.
    Safe,
    /// Side effects, generally recoverable.
    Sensitive,
    /// Destructive or irreversible.
    Critical,
}

impl SafetyLevel {
    /// Numeric rank for ordering comparisons.
    pub fn rank(self) -> u8 {
        match self {
            SafetyLevel::Safe => 0,
            SafetyLevel::Sensitive => 1,
            SafetyLevel::Critical => 2,
        }
    }
}

impl PartialOrd for SafetyLevel {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SafetyLevel {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl fmt::Display for SafetyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyLevel::Safe => write!(f, "safe"),
            SafetyLevel::Sensitive => write!(f, "sensitive"),
            SafetyLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Name prefixes that indicate read-only operations.
const SAFE_PREFIXES: &[&str] = &["get_", "list_", "read_", "search_"];

/// Name prefixes that indicate side-effecting operations.
const SENSITIVE_PREFIXES: &[&str] = &["create_", "write_", "update_", "send_"];

/// Name prefixes that indicate destructive operations.
const CRITICAL_PREFIXES: &[&str] = &["delete_", "destroy_", "drop_", "kill_"];

/// Classify a tool by its name prefix. Unknown names default to
/// `Sensitive` -- unclassified is treated as unsafe.
pub fn classify_tool_name(tool_name: &str) -> SafetyLevel {
    let lower = tool_name.to_ascii_lowercase();
    if CRITICAL_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return SafetyLevel::Critical;
    }
    if SENSITIVE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return SafetyLevel::Sensitive;
    }
    if SAFE_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        return SafetyLevel::Safe;
    }
    SafetyLevel::Sensitive
}

/// Operator-configured overrides keyed by tool name (optionally
/// server-qualified as `server_tool`). Overrides win over the prefix rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SafetyOverrides {
    overrides: HashMap<String, SafetyLevel>,
}

impl SafetyOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_override(mut self, name: &str, level: SafetyLevel) -> Self {
        self.overrides.insert(name.to_owned(), level);
        self
    }

    /// Classify a tool, checking the server-qualified name, the bare name,
    /// and finally the prefix rule.
    pub fn classify(&self, tool_name: &str, server_name: &str) -> SafetyLevel {
        if !server_name.is_empty() {
            let qualified = format!("{server_name}_{tool_name}");
            if let Some(&level) = self.overrides.get(&qualified) {
                return level;
            }
        }
        if let Some(&level) = self.overrides.get(tool_name) {
            return level;
        }
        classify_tool_name(tool_name)
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

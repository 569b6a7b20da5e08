//! Gateway configuration.
//!
//! All knobs the core subsystems read, with serde defaults so a partial
//! YAML/JSON document deserializes into a runnable configuration. Loading
//! from disk is the config loader's job (out of scope); this module owns
//! the shape, the defaults, and the redacted flattening used by the
//! dashboard's `/api/config` surface.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::safety::SafetyOverrides;

// ---------------------------------------------------------------------------
// Provider endpoints
// ---------------------------------------------------------------------------

/// Which wire protocol an endpoint speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Anthropic,
    OpenaiCompatible,
    Ollama,
}

/// One configured LLM provider endpoint.
///
/// Credentials are never stored in config: `api_key_env` names the
/// environment variable read at request time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key_env: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base priority fed into the router's ranking score.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

fn default_priority() -> u32 {
    100
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApprovalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_approval_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub auto_approve_safe: bool,
    /// Default trust duration when a grant does not specify one.
    #[serde(default = "default_trust_minutes")]
    pub trust_duration_minutes: u32,
    #[serde(default, skip_serializing_if = "SafetyOverrides::is_empty")]
    pub overrides: SafetyOverrides,
    /// Tools denied outright, without asking a human.
    #[serde(default)]
    pub denied_tools: Vec<String>,
}

fn default_approval_timeout() -> u64 {
    120
}

fn default_trust_minutes() -> u32 {
    5
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_approval_timeout(),
            auto_approve_safe: true,
            trust_duration_minutes: default_trust_minutes(),
            overrides: SafetyOverrides::default(),
            denied_tools: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_shell_timeout")]
    pub shell_timeout_secs: u64,
    /// Refuse commands containing shell metacharacters entirely.
    #[serde(default)]
    pub exec_only: bool,
    /// Operator additions to the built-in blocked command patterns.
    #[serde(default)]
    pub blocked_commands: Vec<String>,
    /// Roots the write-capable tools may touch.
    #[serde(default = "default_allowed_roots")]
    pub allowed_roots: Vec<PathBuf>,
    /// Operator additions to the built-in sensitive path prefixes.
    #[serde(default)]
    pub blocked_paths: Vec<PathBuf>,
    #[serde(default = "default_max_read_bytes")]
    pub max_read_bytes: u64,
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,
}

fn default_shell_timeout() -> u64 {
    30
}

fn default_allowed_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("/workspace")]
}

fn default_max_read_bytes() -> u64 {
    1024 * 1024
}

fn default_max_search_results() -> usize {
    500
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            shell_timeout_secs: default_shell_timeout(),
            exec_only: false,
            blocked_commands: Vec::new(),
            allowed_roots: default_allowed_roots(),
            blocked_paths: Vec::new(),
            max_read_bytes: default_max_read_bytes(),
            max_search_results: default_max_search_results(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwarmConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_swarm_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_swarm_timeout")]
    pub timeout_secs: u64,
    /// Accumulated feedback is compressed past this size.
    #[serde(default = "default_feedback_limit")]
    pub feedback_limit_chars: usize,
}

fn default_swarm_iterations() -> u32 {
    3
}

fn default_swarm_timeout() -> u64 {
    600
}

fn default_feedback_limit() -> usize {
    3000
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: default_swarm_iterations(),
            timeout_secs: default_swarm_timeout(),
            feedback_limit_chars: default_feedback_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_heal_attempts")]
    pub max_attempts: u32,
}

fn default_heal_attempts() -> u32 {
    3
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_heal_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,
    #[serde(default)]
    pub swarm: SwarmConfig,
    #[serde(default)]
    pub heal: HealConfig,
}

fn default_max_tool_rounds() -> u32 {
    8
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f64 {
    0.7
}

fn default_turn_timeout() -> u64 {
    120
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            turn_timeout_secs: default_turn_timeout(),
            swarm: SwarmConfig::default(),
            heal: HealConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TracingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_traces")]
    pub max_traces: usize,
    #[serde(default = "default_true")]
    pub persist: bool,
    #[serde(default = "default_trace_dir")]
    pub store_path: PathBuf,
}

fn default_max_traces() -> usize {
    500
}

fn default_trace_dir() -> PathBuf {
    PathBuf::from("traces")
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_traces: default_max_traces(),
            persist: true,
            store_path: default_trace_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// Size of the bounded worker pool.
    #[serde(default = "default_workers")]
    pub worker_count: usize,
    /// How many requests may wait for a worker before rejection.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_workers() -> usize {
    4
}

fn default_queue_depth() -> usize {
    16
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_count: default_workers(),
            queue_depth: default_queue_depth(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Top level
// ---------------------------------------------------------------------------

/// Complete gateway configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default)]
    pub providers: Vec<EndpointConfig>,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Key substrings whose values must never leave the process in config
/// dumps, compared case-insensitively.
const REDACTED_KEY_MARKERS: &[&str] = &["api_key", "secret", "password", "token", "private_key"];

impl GatewayConfig {
    /// Flatten the configuration to `section.key` -> display value, with
    /// secret-bearing keys redacted. Works on a serialized deep copy; the
    /// live configuration is never mutated.
    pub fn flatten_redacted(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        let value = serde_json::to_value(self).unwrap_or(Value::Null);
        flatten_into(&mut out, String::new(), &value);
        out
    }
}

fn flatten_into(out: &mut BTreeMap<String, String>, prefix: String, value: &Value) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(out, path, child);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                flatten_into(out, format!("{prefix}.{idx}"), child);
            }
        }
        leaf => {
            let display = if is_redacted_key(&prefix) {
                "***REDACTED***".to_string()
            } else {
                match leaf {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }
            };
            out.insert(prefix, display);
        }
    }
}

fn is_redacted_key(path: &str) -> bool {
    let last = path.rsplit('.').next().unwrap_or(path).to_ascii_lowercase();
    REDACTED_KEY_MARKERS.iter().any(|m| last.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.approval.timeout_secs, 120);
        assert!(cfg.approval.auto_approve_safe);
        assert_eq!(cfg.tools.shell_timeout_secs, 30);
        assert_eq!(cfg.tools.max_read_bytes, 1024 * 1024);
        assert_eq!(cfg.tools.max_search_results, 500);
        assert_eq!(cfg.agent.max_tool_rounds, 8);
        assert_eq!(cfg.agent.turn_timeout_secs, 120);
        assert_eq!(cfg.agent.swarm.max_iterations, 3);
        assert_eq!(cfg.agent.swarm.timeout_secs, 600);
        assert_eq!(cfg.agent.heal.max_attempts, 3);
        assert_eq!(cfg.tracing.max_traces, 500);
        assert_eq!(cfg.runtime.worker_count, 4);
    }

    #[test]
    fn partial_document_fills_defaults() {
        let cfg: GatewayConfig = serde_json::from_str(
            r#"{"agent": {"max_tool_rounds": 4}, "providers": [
                {"name": "main", "kind": "anthropic",
                 "base_url": "https://api.anthropic.com",
                 "model": "claude-sonnet-4-20250514"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(cfg.agent.max_tool_rounds, 4);
        assert_eq!(cfg.agent.max_tokens, 4096);
        assert!(cfg.providers[0].enabled);
        assert_eq!(cfg.providers[0].priority, 100);
    }

    #[test]
    fn provider_kind_wire_names() {
        assert_eq!(
            serde_json::to_string(&ProviderKind::OpenaiCompatible).unwrap(),
            "\"openai-compatible\""
        );
        assert_eq!(
            serde_json::from_str::<ProviderKind>("\"ollama\"").unwrap(),
            ProviderKind::Ollama
        );
    }

    #[test]
    fn flatten_redacts_secret_keys_without_mutating() {
        let mut cfg = GatewayConfig::default();
        cfg.providers.push(EndpointConfig {
            name: "main".into(),
            kind: ProviderKind::Anthropic,
            base_url: "https://api.anthropic.com".into(),
            model: "claude-sonnet-4-20250514".into(),
            api_key_env: "ANTHROPIC_API_KEY".into(),
            enabled: true,
            priority: 100,
        });

        let flat = cfg.flatten_redacted();
        assert_eq!(flat.get("providers.0.name").unwrap(), "main");
        assert_eq!(flat.get("providers.0.api_key_env").unwrap(), "***REDACTED***");
        assert_eq!(flat.get("agent.max_tool_rounds").unwrap(), "8");
        // Live config untouched.
        assert_eq!(cfg.providers[0].api_key_env, "ANTHROPIC_API_KEY");
    }
}

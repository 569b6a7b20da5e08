//! Outbound and inbound UI event frames, plus the [`EventSink`] seam.
//!
//! The WebSocket front door is outside this workspace; the contract it
//! needs from the core is exactly these JSON frames. Components emit
//! through an injected `EventSink` so tests can record frames and the
//! production daemon can forward them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::safety::SafetyLevel;

/// Frames the core emits toward connected UI clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A turn started; `trace_id` lets the UI follow the trace.
    Start { session_id: String, trace_id: String },
    /// A streamed chunk of the final response text.
    Chunk { content: String },
    /// The turn finished.
    End,
    /// A tool call is blocked pending a human decision.
    ApprovalRequest {
        id: String,
        tool_name: String,
        server_name: String,
        description: String,
        safety_level: SafetyLevel,
        #[serde(skip_serializing_if = "Option::is_none")]
        resource_path: Option<String>,
        /// Unix epoch milliseconds after which the request times out.
        deadline: i64,
    },
    /// A pending approval was decided (by a user or by timeout).
    ApprovalResolved { id: String, approved: bool },
    /// Intermediate reasoning text, e.g. from swarm phases.
    ThinkingStream {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_turn: Option<bool>,
    },
    /// A swarm role started working.
    AgentSpawned { role: String },
    /// A swarm role finished its phase.
    AgentCompleted { role: String },
    /// A swarm role failed.
    AgentFailed { role: String },
}

/// Frames the UI sends back into the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    ApprovalResponse {
        approval_id: String,
        approved: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        trust_minutes: Option<u32>,
    },
    BatchApproval {
        approval_ids: Vec<String>,
        approved: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        trust_minutes: Option<u32>,
    },
    HumanHint { text: String },
}

/// Receives outbound frames. Injected by the daemon so this workspace
/// stays decoupled from the transport.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: GatewayEvent);
}

/// Sink that drops every frame. Useful for headless runs and tests that
/// do not care about UI traffic.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: GatewayEvent) {}
}

// ---------------------------------------------------------------------------
// Argument redaction
// ---------------------------------------------------------------------------

/// Maximum length of a displayed argument value.
const PREVIEW_MAX_LEN: usize = 200;

/// Key substrings that mark a value as secret.
const SECRET_KEY_MARKERS: &[&str] = &["token", "secret", "password", "key", "auth"];

/// Produce a display-safe copy of tool arguments: values truncated to 200
/// characters, values under secret-looking keys replaced wholesale. The
/// input is never mutated.
pub fn redact_arguments(args: &Value) -> Value {
    match args {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                let lower = key.to_ascii_lowercase();
                if SECRET_KEY_MARKERS.iter().any(|m| lower.contains(m)) {
                    out.insert(key.clone(), Value::String("***REDACTED***".into()));
                } else {
                    out.insert(key.clone(), redact_arguments(value));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_arguments).collect()),
        Value::String(s) if s.chars().count() > PREVIEW_MAX_LEN => {
            let truncated: String = s.chars().take(PREVIEW_MAX_LEN).collect();
            Value::String(format!("{truncated}..."))
        }
        other => other.clone(),
    }
}

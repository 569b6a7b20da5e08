//! Chat and completion types with provider-format normalization.
//!
//! Vigil speaks one internal message format; the helpers at the bottom of
//! this module convert it to the Anthropic Messages API and OpenAI
//! chat-completions wire shapes. The conversions are part of the provider
//! contract (tool schemas and `tool_use.id` linkage must be preserved
//! byte-faithfully), so they live here next to the types and are covered
//! by unit tests rather than being scattered through the HTTP client.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Role of a message participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    /// System instruction.
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool result fed back to the model.
    Tool,
}

impl fmt::Display for ChatRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatRole::System => write!(f, "system"),
            ChatRole::User => write!(f, "user"),
            ChatRole::Assistant => write!(f, "assistant"),
            ChatRole::Tool => write!(f, "tool"),
        }
    }
}

/// One message in a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    /// Text content. May be empty for assistant messages that only carry
    /// tool calls.
    pub content: String,
    /// For `Tool` messages: the `tool_use.id` this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For `Assistant` messages: tool calls requested by the model.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For `Tool` messages: whether the tool failed.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
            is_error: false,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
            is_error: false,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
            is_error: false,
        }
    }

    /// An assistant message carrying tool calls alongside optional text.
    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls,
            is_error: false,
        }
    }

    /// A tool result message keyed by the originating `tool_use.id`.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
            is_error,
        }
    }
}

// ---------------------------------------------------------------------------
// Tool calls and specs
// ---------------------------------------------------------------------------

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Provider-assigned id; the matching tool result must echo it.
    pub id: String,
    pub name: String,
    /// Arguments as parsed JSON.
    pub arguments: Value,
}

/// A tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema for valid arguments.
    pub input_schema: Value,
}

// ---------------------------------------------------------------------------
// Completion request / response
// ---------------------------------------------------------------------------

/// A completion request, provider-agnostic. The router picks the endpoint
/// (and thus the concrete model) at call time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSpec>,
}

impl CompletionRequest {
    /// A request with just messages; everything else defaulted.
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            system: None,
            messages,
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
        }
    }

    /// Structural validation applied before any request leaves the process.
    pub fn validate(&self) -> Result<(), String> {
        if self.messages.is_empty() {
            return Err("messages must not be empty".into());
        }
        if let Some(temp) = self.temperature {
            if !(0.0..=2.0).contains(&temp) {
                return Err(format!("temperature must be within 0.0..=2.0, got {temp}"));
            }
        }
        if let Some(max_tokens) = self.max_tokens {
            if max_tokens == 0 {
                return Err("max_tokens must be greater than 0".into());
            }
        }
        Ok(())
    }
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    ToolUse,
    StopSequence,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A completion from a provider, normalized to the internal shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
}

// ---------------------------------------------------------------------------
// Anthropic wire format
// ---------------------------------------------------------------------------

/// Convert internal messages to the Anthropic Messages API shape.
///
/// Returns `(system_text, messages)`. System messages are lifted out and
/// concatenated; assistant tool calls become `tool_use` content blocks;
/// runs of consecutive tool results are grouped into a single `user`
/// message of `tool_result` blocks, as the API requires.
pub fn to_anthropic_messages(system: Option<&str>, messages: &[ChatMessage]) -> (String, Vec<Value>) {
    let mut system_text = system.unwrap_or_default().to_string();
    let mut out: Vec<Value> = Vec::new();
    let mut pending_results: Vec<Value> = Vec::new();

    let flush_results = |out: &mut Vec<Value>, pending: &mut Vec<Value>| {
        if !pending.is_empty() {
            out.push(json!({"role": "user", "content": std::mem::take(pending)}));
        }
    };

    for msg in messages {
        match msg.role {
            ChatRole::System => {
                if !system_text.is_empty() {
                    system_text.push('\n');
                }
                system_text.push_str(&msg.content);
            }
            ChatRole::Tool => {
                pending_results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content,
                    "is_error": msg.is_error,
                }));
            }
            ChatRole::User => {
                flush_results(&mut out, &mut pending_results);
                out.push(json!({"role": "user", "content": msg.content}));
            }
            ChatRole::Assistant => {
                flush_results(&mut out, &mut pending_results);
                if msg.tool_calls.is_empty() {
                    out.push(json!({"role": "assistant", "content": msg.content}));
                } else {
                    let mut blocks: Vec<Value> = Vec::new();
                    if !msg.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": msg.content}));
                    }
                    for call in &msg.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    out.push(json!({"role": "assistant", "content": blocks}));
                }
            }
        }
    }
    flush_results(&mut out, &mut pending_results);

    (system_text, out)
}

/// Anthropic tool schema list: `{name, description, input_schema}`.
pub fn to_anthropic_tools(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// OpenAI wire format
// ---------------------------------------------------------------------------

/// Convert internal messages to the OpenAI chat-completions shape.
///
/// The system prompt becomes a leading `system` message; assistant tool
/// calls become `tool_calls` entries with JSON-encoded argument strings;
/// tool results become `role:"tool"` messages with `tool_call_id`.
pub fn to_openai_messages(system: Option<&str>, messages: &[ChatMessage]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    if let Some(system) = system {
        if !system.is_empty() {
            out.push(json!({"role": "system", "content": system}));
        }
    }

    for msg in messages {
        match msg.role {
            ChatRole::System => {
                out.push(json!({"role": "system", "content": msg.content}));
            }
            ChatRole::User => {
                out.push(json!({"role": "user", "content": msg.content}));
            }
            ChatRole::Tool => {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
                    "content": msg.content,
                }));
            }
            ChatRole::Assistant => {
                if msg.tool_calls.is_empty() {
                    out.push(json!({"role": "assistant", "content": msg.content}));
                } else {
                    let calls: Vec<Value> = msg
                        .tool_calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                },
                            })
                        })
                        .collect();
                    let content = if msg.content.is_empty() {
                        Value::Null
                    } else {
                        Value::String(msg.content.clone())
                    };
                    out.push(json!({
                        "role": "assistant",
                        "content": content,
                        "tool_calls": calls,
                    }));
                }
            }
        }
    }
    out
}

/// OpenAI tool schema list: `{type:"function", function:{...}}`.
pub fn to_openai_tools(tools: &[ToolSpec]) -> Vec<Value> {
    tools
        .iter()
        .map(|t| {
            json!({
                "type": "function",
                "function": {
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.input_schema,
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: json!({"path": "/workspace/a.txt"}),
        }
    }

    #[test]
    fn anthropic_lifts_system_messages() {
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hello"),
        ];
        let (system, wire) = to_anthropic_messages(Some("base prompt"), &messages);
        assert_eq!(system, "base prompt\nbe terse");
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
    }

    #[test]
    fn anthropic_tool_use_round_trip_preserves_ids() {
        let messages = vec![
            ChatMessage::user("read the file"),
            ChatMessage::assistant_with_calls("", vec![call("toolu_01", "read_file")]),
            ChatMessage::tool_result("toolu_01", "contents", false),
        ];
        let (_, wire) = to_anthropic_messages(None, &messages);
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[1]["content"][0]["type"], "tool_use");
        assert_eq!(wire[1]["content"][0]["id"], "toolu_01");
        // Tool results arrive as user messages with tool_result blocks.
        assert_eq!(wire[2]["role"], "user");
        assert_eq!(wire[2]["content"][0]["type"], "tool_result");
        assert_eq!(wire[2]["content"][0]["tool_use_id"], "toolu_01");
        assert_eq!(wire[2]["content"][0]["is_error"], false);
    }

    #[test]
    fn anthropic_groups_consecutive_tool_results() {
        let messages = vec![
            ChatMessage::assistant_with_calls(
                "",
                vec![call("toolu_01", "read_file"), call("toolu_02", "shell")],
            ),
            ChatMessage::tool_result("toolu_01", "a", false),
            ChatMessage::tool_result("toolu_02", "b", true),
        ];
        let (_, wire) = to_anthropic_messages(None, &messages);
        assert_eq!(wire.len(), 2, "both results share one user message");
        let blocks = wire[1]["content"].as_array().unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1]["is_error"], true);
    }

    #[test]
    fn openai_tool_calls_use_function_encoding() {
        let messages = vec![
            ChatMessage::user("run it"),
            ChatMessage::assistant_with_calls("", vec![call("call_9", "shell")]),
            ChatMessage::tool_result("call_9", "done", false),
        ];
        let wire = to_openai_messages(Some("sys"), &messages);
        assert_eq!(wire[0]["role"], "system");
        let tc = &wire[2]["tool_calls"][0];
        assert_eq!(tc["type"], "function");
        assert_eq!(tc["id"], "call_9");
        // Arguments are a JSON-encoded string in the OpenAI format.
        assert!(tc["function"]["arguments"].is_string());
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_9");
    }

    #[test]
    fn tool_spec_wire_shapes() {
        let tools = vec![ToolSpec {
            name: "shell".into(),
            description: "run a command".into(),
            input_schema: json!({"type": "object"}),
        }];
        let a = to_anthropic_tools(&tools);
        assert_eq!(a[0]["input_schema"]["type"], "object");
        let o = to_openai_tools(&tools);
        assert_eq!(o[0]["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn request_validation_bounds() {
        let mut req = CompletionRequest::new(vec![ChatMessage::user("hi")]);
        assert!(req.validate().is_ok());
        req.temperature = Some(3.0);
        assert!(req.validate().is_err());
        req.temperature = Some(0.2);
        req.max_tokens = Some(0);
        assert!(req.validate().is_err());
        let empty = CompletionRequest::new(vec![]);
        assert!(empty.validate().is_err());
    }
}

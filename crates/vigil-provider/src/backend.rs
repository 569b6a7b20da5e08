//! The HTTP transport behind the router.
//!
//! [`CompletionBackend`] is the injected seam: production uses
//! [`HttpBackend`] (reqwest, no redirects, bounded bodies); tests script
//! responses. The two wire formats are built from the conversion helpers
//! in `vigil_types::llm` and parsed back into [`CompletionResponse`].
//!
//! Security posture follows the rest of the workspace: API keys are read
//! from environment variables at request time and never logged; response
//! bodies are size-capped before parsing.

use std::time::Duration;

use serde_json::{json, Value};

use vigil_types::llm::{
    to_anthropic_messages, to_anthropic_tools, to_openai_messages, to_openai_tools,
};
use vigil_types::{
    CompletionRequest, CompletionResponse, EndpointConfig, ProviderKind, StopReason, TokenUsage,
    ToolCall,
};

/// Maximum serialized request body (1 MB).
const MAX_REQUEST_BODY_BYTES: usize = 1_000_000;

/// Maximum response body read (10 MB).
const MAX_RESPONSE_BODY_BYTES: u64 = 10_000_000;

/// Default completion budget when the request does not set one.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Failures surfaced by the transport and the router.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Every endpoint is disabled, rate-limited, or circuit-open.
    #[error("no LLM provider endpoint is currently available")]
    Unavailable,

    /// Network error, 5xx, or rate limiting: worth trying another
    /// endpoint.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Misconfiguration or a definitive 4xx: retrying elsewhere may still
    /// help, retrying here will not.
    #[error("provider request rejected: {0}")]
    Rejected(String),
}

/// Transport seam between the router and the provider HTTP APIs.
#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(
        &self,
        endpoint: &EndpointConfig,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;
}

/// Production transport speaking the Anthropic Messages API and the
/// OpenAI chat-completions API.
pub struct HttpBackend {
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .user_agent("vigil/0.3")
            .build()
            .map_err(|e| ProviderError::Rejected(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    fn read_api_key(endpoint: &EndpointConfig) -> Result<Option<String>, ProviderError> {
        if endpoint.api_key_env.is_empty() {
            return Ok(None);
        }
        match std::env::var(&endpoint.api_key_env) {
            Ok(key) if !key.is_empty() => Ok(Some(key)),
            _ => Err(ProviderError::Rejected(format!(
                "environment variable '{}' not set for endpoint '{}'",
                endpoint.api_key_env, endpoint.name
            ))),
        }
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        body: Value,
    ) -> Result<Value, ProviderError> {
        let bytes = serde_json::to_vec(&body)
            .map_err(|e| ProviderError::Rejected(format!("failed to serialize request: {e}")))?;
        if bytes.len() > MAX_REQUEST_BODY_BYTES {
            return Err(ProviderError::Rejected(format!(
                "request body too large: {} bytes (max {MAX_REQUEST_BODY_BYTES})",
                bytes.len()
            )));
        }

        let response = builder
            .header("content-type", "application/json")
            .body(bytes)
            .send()
            .await
            .map_err(|e| ProviderError::Transient(format!("request failed: {e}")))?;

        if let Some(length) = response.content_length() {
            if length > MAX_RESPONSE_BODY_BYTES {
                return Err(ProviderError::Rejected(format!(
                    "response too large: {length} bytes"
                )));
            }
        }

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::Transient(format!("failed to read response: {e}")))?;
        if text.len() as u64 > MAX_RESPONSE_BODY_BYTES {
            return Err(ProviderError::Rejected(format!(
                "response body too large: {} bytes",
                text.len()
            )));
        }

        if status.as_u16() == 429 || status.is_server_error() {
            return Err(ProviderError::Transient(format!(
                "provider returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(ProviderError::Rejected(format!(
                "provider returned {status}"
            )));
        }

        serde_json::from_str(&text)
            .map_err(|e| ProviderError::Transient(format!("invalid response JSON: {e}")))
    }
}

#[async_trait::async_trait]
impl CompletionBackend for HttpBackend {
    async fn complete(
        &self,
        endpoint: &EndpointConfig,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        tracing::info!(
            endpoint = %endpoint.name,
            model = %endpoint.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending completion request"
        );
        match endpoint.kind {
            ProviderKind::Anthropic => self.complete_anthropic(endpoint, request).await,
            ProviderKind::OpenaiCompatible | ProviderKind::Ollama => {
                self.complete_openai(endpoint, request).await
            }
        }
    }
}

impl HttpBackend {
    async fn complete_anthropic(
        &self,
        endpoint: &EndpointConfig,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let api_key = Self::read_api_key(endpoint)?.ok_or_else(|| {
            ProviderError::Rejected(format!(
                "endpoint '{}' has no api_key_env configured",
                endpoint.name
            ))
        })?;

        let url = format!("{}/v1/messages", endpoint.base_url.trim_end_matches('/'));
        let (system, messages) =
            to_anthropic_messages(request.system.as_deref(), &request.messages);

        let mut body = json!({
            "model": endpoint.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "messages": messages,
        });
        if !system.is_empty() {
            body["system"] = Value::String(system);
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(to_anthropic_tools(&request.tools));
        }

        let builder = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01");
        let response = self.send(builder, body).await?;
        parse_anthropic_response(&response, &endpoint.model)
    }

    async fn complete_openai(
        &self,
        endpoint: &EndpointConfig,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let url = openai_chat_url(&endpoint.base_url);
        let messages = to_openai_messages(request.system.as_deref(), &request.messages);

        let mut body = json!({
            "model": endpoint.model,
            "messages": messages,
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(to_openai_tools(&request.tools));
        }

        let mut builder = self.client.post(&url);
        if let Some(api_key) = Self::read_api_key(endpoint)? {
            builder = builder.header("authorization", format!("Bearer {api_key}"));
        }
        let response = self.send(builder, body).await?;
        parse_openai_response(&response, &endpoint.model)
    }
}

/// `{base}/chat/completions`, inserting `/v1` unless the base already
/// carries a version segment (Ollama bases usually end in `/v1`).
fn openai_chat_url(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/v1") {
        format!("{base}/chat/completions")
    } else {
        format!("{base}/v1/chat/completions")
    }
}

/// Parse an Anthropic Messages API response.
pub fn parse_anthropic_response(
    json: &Value,
    model: &str,
) -> Result<CompletionResponse, ProviderError> {
    let blocks = json
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Transient("response missing content blocks".into()))?;

    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    if !content.is_empty() {
                        content.push('\n');
                    }
                    content.push_str(text);
                }
            }
            Some("tool_use") => {
                tool_calls.push(ToolCall {
                    id: block
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    name: block
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    arguments: block.get("input").cloned().unwrap_or(Value::Null),
                });
            }
            _ => {}
        }
    }

    let usage = TokenUsage {
        input_tokens: json
            .pointer("/usage/input_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        output_tokens: json
            .pointer("/usage/output_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    };
    let stop_reason = match json.get("stop_reason").and_then(Value::as_str) {
        Some("end_turn") => Some(StopReason::EndTurn),
        Some("max_tokens") => Some(StopReason::MaxTokens),
        Some("tool_use") => Some(StopReason::ToolUse),
        Some("stop_sequence") => Some(StopReason::StopSequence),
        _ => None,
    };

    Ok(CompletionResponse {
        content,
        model: json
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(model)
            .to_string(),
        usage,
        tool_calls,
        stop_reason,
    })
}

/// Parse an OpenAI chat-completions response.
pub fn parse_openai_response(
    json: &Value,
    model: &str,
) -> Result<CompletionResponse, ProviderError> {
    let choice = json
        .pointer("/choices/0")
        .ok_or_else(|| ProviderError::Transient("response missing choices".into()))?;
    let message = choice
        .get("message")
        .ok_or_else(|| ProviderError::Transient("response missing message".into()))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let arguments_raw = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");
            let arguments =
                serde_json::from_str(arguments_raw).unwrap_or(Value::String(arguments_raw.into()));
            tool_calls.push(ToolCall {
                id: call
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                arguments,
            });
        }
    }

    let usage = TokenUsage {
        input_tokens: json
            .pointer("/usage/prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        output_tokens: json
            .pointer("/usage/completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    };
    let stop_reason = match choice.get("finish_reason").and_then(Value::as_str) {
        Some("stop") => Some(StopReason::EndTurn),
        Some("length") => Some(StopReason::MaxTokens),
        Some("tool_calls") => Some(StopReason::ToolUse),
        _ => None,
    };

    Ok(CompletionResponse {
        content,
        model: json
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(model)
            .to_string(),
        usage,
        tool_calls,
        stop_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_response_with_tool_use_parses() {
        let raw = json!({
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "tool_use",
            "content": [
                {"type": "text", "text": "Let me check that file."},
                {"type": "tool_use", "id": "toolu_abc", "name": "read_file",
                 "input": {"path": "/workspace/a.txt"}}
            ],
            "usage": {"input_tokens": 210, "output_tokens": 44}
        });
        let parsed = parse_anthropic_response(&raw, "fallback").unwrap();
        assert_eq!(parsed.content, "Let me check that file.");
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].id, "toolu_abc");
        assert_eq!(parsed.tool_calls[0].arguments["path"], "/workspace/a.txt");
        assert_eq!(parsed.stop_reason, Some(StopReason::ToolUse));
        assert_eq!(parsed.usage.input_tokens, 210);
    }

    #[test]
    fn openai_response_with_tool_calls_parses() {
        let raw = json!({
            "model": "gpt-4o",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "shell",
                            "arguments": "{\"command\": \"ls\"}"
                        }
                    }]
                }
            }],
            "usage": {"prompt_tokens": 90, "completion_tokens": 12}
        });
        let parsed = parse_openai_response(&raw, "fallback").unwrap();
        assert!(parsed.content.is_empty());
        assert_eq!(parsed.tool_calls[0].name, "shell");
        assert_eq!(parsed.tool_calls[0].arguments["command"], "ls");
        assert_eq!(parsed.stop_reason, Some(StopReason::ToolUse));
    }

    #[test]
    fn plain_text_responses_parse() {
        let anthropic = json!({
            "content": [{"type": "text", "text": "Hello."}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 5, "output_tokens": 2}
        });
        let parsed = parse_anthropic_response(&anthropic, "m").unwrap();
        assert_eq!(parsed.content, "Hello.");
        assert_eq!(parsed.stop_reason, Some(StopReason::EndTurn));

        let openai = json!({
            "choices": [{"finish_reason": "stop",
                         "message": {"role": "assistant", "content": "Hi."}}]
        });
        let parsed = parse_openai_response(&openai, "m").unwrap();
        assert_eq!(parsed.content, "Hi.");
        assert!(parsed.tool_calls.is_empty());
    }

    #[test]
    fn malformed_responses_are_transient() {
        assert!(matches!(
            parse_anthropic_response(&json!({}), "m"),
            Err(ProviderError::Transient(_))
        ));
        assert!(matches!(
            parse_openai_response(&json!({"choices": []}), "m"),
            Err(ProviderError::Transient(_))
        ));
    }

    #[test]
    fn openai_url_handles_versioned_bases() {
        assert_eq!(
            openai_chat_url("https://api.openai.com"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            openai_chat_url("http://localhost:11434/v1/"),
            "http://localhost:11434/v1/chat/completions"
        );
    }
}

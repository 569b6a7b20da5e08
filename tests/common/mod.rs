//! Shared fixtures for the cross-crate integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use vigil::provider::{CompletionBackend, ProviderError};
use vigil::types::{
    CompletionRequest, CompletionResponse, EndpointConfig, EventSink, GatewayConfig, GatewayEvent,
    ProviderKind, TokenUsage, ToolCall,
};

/// Backend that pops scripted responses in order (regardless of which
/// endpoint is asked) and records every request it sees.
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<CompletionResponse>>,
    requests: Mutex<Vec<(String, CompletionRequest)>>,
}

#[allow(dead_code)]
impl ScriptedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push_text(&self, text: &str) {
        self.responses.lock().unwrap().push_back(text_reply(text));
    }

    pub fn push_tool_call(&self, id: &str, name: &str, arguments: serde_json::Value) {
        self.responses.lock().unwrap().push_back(CompletionResponse {
            content: String::new(),
            model: "test-model".into(),
            usage: TokenUsage::default(),
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: name.into(),
                arguments,
            }],
            stop_reason: None,
        });
    }

    pub fn requests(&self) -> Vec<(String, CompletionRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(
        &self,
        endpoint: &EndpointConfig,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.requests
            .lock()
            .unwrap()
            .push((endpoint.name.clone(), request.clone()));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Transient("script exhausted".into()))
    }
}

/// Backend that fails for named endpoints and delegates the rest to an
/// inner scripted backend. Used for failover scenarios.
pub struct FlakyBackend {
    pub failing_endpoints: Vec<String>,
    pub inner: Arc<ScriptedBackend>,
}

#[async_trait::async_trait]
impl CompletionBackend for FlakyBackend {
    async fn complete(
        &self,
        endpoint: &EndpointConfig,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        if self.failing_endpoints.iter().any(|n| n == &endpoint.name) {
            return Err(ProviderError::Transient("529 overloaded".into()));
        }
        self.inner.complete(endpoint, request).await
    }
}

pub fn text_reply(text: &str) -> CompletionResponse {
    CompletionResponse {
        content: text.to_string(),
        model: "test-model".into(),
        usage: TokenUsage {
            input_tokens: 25,
            output_tokens: 10,
        },
        tool_calls: vec![],
        stop_reason: None,
    }
}

/// Sink that records every emitted frame.
pub struct RecordingSink {
    frames: Mutex<Vec<GatewayEvent>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            frames: Mutex::new(Vec::new()),
        })
    }

    pub fn frames(&self) -> Vec<GatewayEvent> {
        self.frames.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: GatewayEvent) {
        self.frames.lock().unwrap().push(event);
    }
}

pub fn endpoint(name: &str, priority: u32) -> EndpointConfig {
    EndpointConfig {
        name: name.into(),
        kind: ProviderKind::Anthropic,
        base_url: "https://example.invalid".into(),
        model: "test-model".into(),
        api_key_env: String::new(),
        enabled: true,
        priority,
    }
}

/// A gateway config with one scripted endpoint, no persistence, and a
/// temp-dir workspace as the only allowed root.
#[allow(dead_code)]
pub fn test_config(workspace: &std::path::Path) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.tracing.persist = false;
    config.tools.allowed_roots = vec![workspace.to_path_buf()];
    config.providers.push(endpoint("scripted", 100));
    config
}

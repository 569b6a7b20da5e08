//! The single-turn orchestrator.
//!
//! One turn is a bounded loop: call the provider with the tool catalogue,
//! dispatch every requested tool call through the approval broker and the
//! executor, thread the results back, and repeat until the model answers
//! in plain text or the round budget forces a final tool-free turn.

use std::sync::Arc;

use serde_json::{json, Value};

use vigil_approval::{ApprovalBroker, ApprovalOutcome, Decision};
use vigil_provider::{ProviderError, ProviderRouter};
use vigil_tools::{ToolErrorKind, ToolExecutor, ToolResult};
use vigil_trace::{SpanKind, SpanStatus, TraceRecorder};
use vigil_types::config::AgentConfig;
use vigil_types::{
    ChatMessage, CompletionRequest, EventSink, GatewayError, GatewayEvent, ToolCall, ToolSpec,
    TraceId,
};

use crate::cancel::CancelSignal;
use crate::profiles::AgentProfile;

/// System prompt used when no profile is active.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Vigil, an autonomous assistant that can call \
    tools to get work done. Use tools when they help; answer directly when they do not. Be \
    precise and concise.";

/// Name prefix routed to the skill dispatcher instead of the executor.
const SKILL_PREFIX: &str = "skill_";

/// Dispatcher for `skill_*` tools. The skill system itself lives outside
/// this workspace; the brain only needs somewhere to send the call.
#[async_trait::async_trait]
pub trait SkillDispatch: Send + Sync {
    async fn dispatch(&self, tool_name: &str, arguments: Value) -> ToolResult;
}

/// Single-turn orchestrator.
pub struct Brain {
    router: Arc<ProviderRouter>,
    tools: Arc<ToolExecutor>,
    approvals: Arc<ApprovalBroker>,
    recorder: Arc<TraceRecorder>,
    events: Arc<dyn EventSink>,
    config: AgentConfig,
    skills: Option<Arc<dyn SkillDispatch>>,
}

impl Brain {
    pub fn new(
        router: Arc<ProviderRouter>,
        tools: Arc<ToolExecutor>,
        approvals: Arc<ApprovalBroker>,
        recorder: Arc<TraceRecorder>,
        events: Arc<dyn EventSink>,
        config: AgentConfig,
    ) -> Self {
        Self {
            router,
            tools,
            approvals,
            recorder,
            events,
            config,
            skills: None,
        }
    }

    /// Attach a skill dispatcher for `skill_*` tool names.
    pub fn with_skills(mut self, skills: Arc<dyn SkillDispatch>) -> Self {
        self.skills = Some(skills);
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn router(&self) -> &Arc<ProviderRouter> {
        &self.router
    }

    /// Run one turn over the given history (which already ends with the
    /// user's message). Returns the assistant's final text.
    pub async fn run_turn(
        &self,
        trace_id: &TraceId,
        mut history: Vec<ChatMessage>,
        profile: Option<&AgentProfile>,
        mut cancel: CancelSignal,
    ) -> Result<String, GatewayError> {
        let system = profile
            .map(|p| p.system_prompt.clone())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let temperature = profile.map_or(self.config.temperature, |p| p.temperature);
        let catalogue = self.tool_catalogue(profile);
        let max_rounds = self.config.max_tool_rounds.max(1);

        for call_index in 0..max_rounds {
            // The last permitted provider call runs with tools disabled,
            // forcing a text answer.
            let tools_enabled = call_index + 1 < max_rounds && !catalogue.is_empty();
            let request = CompletionRequest {
                system: Some(system.clone()),
                messages: history.clone(),
                temperature: Some(temperature),
                max_tokens: Some(self.config.max_tokens),
                tools: if tools_enabled {
                    catalogue.clone()
                } else {
                    Vec::new()
                },
            };

            // The router records one `llm_call` span per endpoint attempt.
            let outcome = tokio::select! {
                result = self.router.complete(&request, Some((self.recorder.as_ref(), trace_id))) => result,
                _ = cancel.cancelled() => {
                    return Err(GatewayError::DeadlineExceeded);
                }
            };
            let (response, _endpoint) = match outcome {
                Ok(pair) => pair,
                Err(err) => return Err(map_provider_error(err)),
            };

            if response.tool_calls.is_empty() || !tools_enabled {
                return Ok(self.finish_text_turn(trace_id, response.content));
            }

            history.push(ChatMessage::assistant_with_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));
            // Tool calls execute sequentially, in the order the model
            // emitted them; each result is threaded back under its id.
            for call in &response.tool_calls {
                let result = self.dispatch_tool_call(trace_id, call, &mut cancel).await;
                history.push(ChatMessage::tool_result(
                    call.id.clone(),
                    result.to_content(),
                    !result.ok,
                ));
            }
        }

        Err(GatewayError::Internal("turn loop overran its bound".into()))
    }

    /// The tool specs advertised to the model, narrowed by the profile.
    fn tool_catalogue(&self, profile: Option<&AgentProfile>) -> Vec<ToolSpec> {
        let specs = self.tools.registry().list_specs();
        match profile {
            None => specs,
            Some(profile) => specs
                .into_iter()
                .filter(|spec| profile.permits(&spec.name))
                .collect(),
        }
    }

    fn finish_text_turn(&self, trace_id: &TraceId, text: String) -> String {
        let span = self
            .recorder
            .start_span(trace_id, SpanKind::Response, "final", None);
        self.events.emit(GatewayEvent::Chunk {
            content: text.clone(),
        });
        self.recorder
            .record_event(&span, "chunk", json!({"text": text}));
        self.recorder.end_span(
            &span,
            SpanStatus::Ok,
            vec![("length".into(), text.len().to_string())],
        );
        text
    }

    /// Gate one tool call through the broker, then run it.
    async fn dispatch_tool_call(
        &self,
        trace_id: &TraceId,
        call: &ToolCall,
        cancel: &mut CancelSignal,
    ) -> ToolResult {
        let is_skill = call.name.starts_with(SKILL_PREFIX);
        let server = if is_skill { "skills" } else { "builtin" };

        let approval_span =
            self.recorder
                .start_span(trace_id, SpanKind::Approval, &call.name, None);
        let decision = self.approvals.check(&call.name, server, &call.arguments);

        let verdict: Result<&'static str, ToolResult> = match decision {
            Decision::AutoAllow { reason } => Ok(reason),
            Decision::DenyPolicy { reason } => Err(ToolResult::failure(
                ToolErrorKind::PolicyViolation,
                reason,
            )),
            Decision::RequireApproval { id } => {
                let outcome = tokio::select! {
                    outcome = self.approvals.wait(&id, self.approvals.timeout()) => outcome,
                    _ = cancel.cancelled() => ApprovalOutcome::Timeout,
                };
                match outcome {
                    ApprovalOutcome::Approved => Ok("user_approved"),
                    ApprovalOutcome::Denied => {
                        Err(ToolResult::denied("tool call denied by user"))
                    }
                    ApprovalOutcome::Timeout => {
                        Err(ToolResult::denied("approval request timed out"))
                    }
                }
            }
        };

        match verdict {
            Ok(reason) => {
                self.recorder.end_span(
                    &approval_span,
                    SpanStatus::Ok,
                    vec![("decision".into(), reason.to_string())],
                );
                if is_skill {
                    self.dispatch_skill(trace_id, call).await
                } else {
                    self.tools
                        .execute(trace_id, &call.name, call.arguments.clone())
                        .await
                }
            }
            Err(result) => {
                self.recorder.end_span(
                    &approval_span,
                    SpanStatus::Error,
                    vec![("decision".into(), result.outcome().to_string())],
                );
                tracing::info!(
                    tool = %call.name,
                    outcome = result.outcome(),
                    "tool call blocked"
                );
                result
            }
        }
    }

    async fn dispatch_skill(&self, trace_id: &TraceId, call: &ToolCall) -> ToolResult {
        let span = self
            .recorder
            .start_span(trace_id, SpanKind::McpCall, &call.name, None);
        let result = match &self.skills {
            Some(skills) => skills.dispatch(&call.name, call.arguments.clone()).await,
            None => ToolResult::failure(
                ToolErrorKind::NotFound,
                format!("no skill dispatcher registered for {}", call.name),
            ),
        };
        let status = if result.ok {
            SpanStatus::Ok
        } else {
            SpanStatus::Error
        };
        self.recorder.end_span(
            &span,
            status,
            vec![("outcome".into(), result.outcome().to_string())],
        );
        result
    }
}

fn map_provider_error(err: ProviderError) -> GatewayError {
    match err {
        ProviderError::Unavailable | ProviderError::Transient(_) => {
            GatewayError::ProviderUnavailable
        }
        ProviderError::Rejected(message) => GatewayError::Internal(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Mutex;

    use vigil_provider::CompletionBackend;
    use vigil_tools::{PathPolicy, Tool, ToolError, ToolRegistry};
    use vigil_trace::TraceStatus;
    use vigil_types::config::ApprovalConfig;
    use vigil_types::{
        CompletionResponse, EndpointConfig, NullSink, ProviderKind, TokenUsage,
    };

    /// Backend that pops scripted responses and records every request.
    struct ScriptedBackend {
        responses: Mutex<VecDeque<CompletionResponse>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedBackend {
        fn new(responses: Vec<CompletionResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(
            &self,
            _endpoint: &EndpointConfig,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ProviderError::Transient("script exhausted".into()))
        }
    }

    fn text_reply(text: &str) -> CompletionResponse {
        CompletionResponse {
            content: text.into(),
            model: "test-model".into(),
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
            },
            tool_calls: vec![],
            stop_reason: None,
        }
    }

    fn tool_reply(id: &str, name: &str, args: Value) -> CompletionResponse {
        CompletionResponse {
            content: String::new(),
            model: "test-model".into(),
            usage: TokenUsage::default(),
            tool_calls: vec![ToolCall {
                id: id.into(),
                name: name.into(),
                arguments: args,
            }],
            stop_reason: None,
        }
    }

    struct NamedTool {
        tool_name: &'static str,
    }

    #[async_trait::async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.tool_name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, input: Value) -> Result<Value, ToolError> {
            Ok(json!({"echo": input}))
        }
    }

    fn build_brain(
        backend: Arc<ScriptedBackend>,
        approval_config: ApprovalConfig,
        agent_config: AgentConfig,
    ) -> (Brain, Arc<TraceRecorder>, Arc<ApprovalBroker>) {
        let endpoint = EndpointConfig {
            name: "scripted".into(),
            kind: ProviderKind::Anthropic,
            base_url: "https://example.invalid".into(),
            model: "test-model".into(),
            api_key_env: String::new(),
            enabled: true,
            priority: 100,
        };
        let router = Arc::new(ProviderRouter::new(vec![endpoint], backend));
        let recorder = Arc::new(TraceRecorder::in_memory());

        let registry = ToolRegistry::new();
        registry
            .register(Arc::new(NamedTool {
                tool_name: "read_notes",
            }))
            .unwrap();
        registry
            .register(Arc::new(NamedTool {
                tool_name: "write_notes",
            }))
            .unwrap();
        let executor = Arc::new(ToolExecutor::new(
            registry,
            Arc::new(PathPolicy::rooted(&[Path::new("/workspace")])),
            vigil_tools::ExecutorConfig::default(),
            recorder.clone(),
        ));
        let approvals = Arc::new(ApprovalBroker::new(approval_config, Arc::new(NullSink)));
        let brain = Brain::new(
            router,
            executor,
            approvals.clone(),
            recorder.clone(),
            Arc::new(NullSink),
            agent_config,
        );
        (brain, recorder, approvals)
    }

    #[tokio::test]
    async fn plain_text_turn_records_llm_and_response_spans() {
        let backend = ScriptedBackend::new(vec![text_reply("The answer is 4.")]);
        let (brain, recorder, _) = build_brain(
            backend.clone(),
            ApprovalConfig::default(),
            AgentConfig::default(),
        );

        let trace_id = recorder.start_trace("what is 2+2");
        let text = brain
            .run_turn(
                &trace_id,
                vec![ChatMessage::user("what is 2+2")],
                None,
                CancelSignal::never(),
            )
            .await
            .unwrap();
        assert_eq!(text, "The answer is 4.");

        recorder.end_trace(&trace_id, &text, TraceStatus::Completed);
        let trace = recorder.get(&trace_id).unwrap();
        let kinds: Vec<SpanKind> = trace.spans.iter().map(|s| s.kind).collect();
        assert!(kinds.contains(&SpanKind::LlmCall));
        assert!(kinds.contains(&SpanKind::Response));
        // The single provider call advertised the tool catalogue.
        assert_eq!(backend.requests()[0].tools.len(), 2);
    }

    #[tokio::test]
    async fn tool_round_threads_result_under_same_id() {
        let backend = ScriptedBackend::new(vec![
            tool_reply("toolu_1", "read_notes", json!({"topic": "standup"})),
            text_reply("Here is your summary."),
        ]);
        let (brain, recorder, _) = build_brain(
            backend.clone(),
            ApprovalConfig::default(),
            AgentConfig::default(),
        );

        let trace_id = recorder.start_trace("summarize notes");
        let text = brain
            .run_turn(
                &trace_id,
                vec![ChatMessage::user("summarize notes")],
                None,
                CancelSignal::never(),
            )
            .await
            .unwrap();
        assert_eq!(text, "Here is your summary.");

        let requests = backend.requests();
        assert_eq!(requests.len(), 2);
        // The second request carries the assistant tool call and its
        // result, linked by id.
        let followup = &requests[1].messages;
        let assistant = followup
            .iter()
            .find(|m| !m.tool_calls.is_empty())
            .expect("assistant tool-call message present");
        assert_eq!(assistant.tool_calls[0].id, "toolu_1");
        let tool_msg = followup
            .iter()
            .find(|m| m.tool_call_id.is_some())
            .expect("tool result message present");
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("toolu_1"));
        assert!(tool_msg.content.contains("\"ok\":true"));
    }

    #[tokio::test]
    async fn denied_approval_becomes_synthetic_tool_result() {
        // Zero timeout: the approval wait expires immediately.
        let approval_config = ApprovalConfig {
            timeout_secs: 0,
            ..ApprovalConfig::default()
        };
        let backend = ScriptedBackend::new(vec![
            tool_reply("toolu_9", "write_notes", json!({"topic": "x"})),
            text_reply("I could not write the notes."),
        ]);
        let (brain, recorder, _) =
            build_brain(backend.clone(), approval_config, AgentConfig::default());

        let trace_id = recorder.start_trace("write notes");
        let text = brain
            .run_turn(
                &trace_id,
                vec![ChatMessage::user("write notes")],
                None,
                CancelSignal::never(),
            )
            .await
            .unwrap();
        assert_eq!(text, "I could not write the notes.");

        let requests = backend.requests();
        let tool_msg = requests[1]
            .messages
            .iter()
            .find(|m| m.tool_call_id.is_some())
            .unwrap();
        assert!(tool_msg.is_error);
        assert!(tool_msg.content.contains("denied"));
    }

    #[tokio::test]
    async fn round_budget_forces_final_text_turn() {
        let config = AgentConfig {
            max_tool_rounds: 3,
            ..AgentConfig::default()
        };
        // The model asks for a tool every single time.
        let backend = ScriptedBackend::new(vec![
            tool_reply("t1", "read_notes", json!({})),
            tool_reply("t2", "read_notes", json!({})),
            text_reply("Stopping here."),
        ]);
        let (brain, recorder, _) =
            build_brain(backend.clone(), ApprovalConfig::default(), config);

        let trace_id = recorder.start_trace("loop forever");
        let text = brain
            .run_turn(
                &trace_id,
                vec![ChatMessage::user("loop forever")],
                None,
                CancelSignal::never(),
            )
            .await
            .unwrap();
        assert_eq!(text, "Stopping here.");

        let requests = backend.requests();
        assert_eq!(requests.len(), 3, "bounded by max_tool_rounds");
        assert!(
            requests.last().unwrap().tools.is_empty(),
            "final round advertises no tools"
        );
    }

    #[tokio::test]
    async fn profile_narrows_tool_catalogue() {
        let backend = ScriptedBackend::new(vec![text_reply("done")]);
        let (brain, recorder, _) = build_brain(
            backend.clone(),
            ApprovalConfig::default(),
            AgentConfig::default(),
        );

        let profile = crate::profiles::builtin_profile(crate::profiles::AgentRole::Critic);
        let trace_id = recorder.start_trace("judge this");
        brain
            .run_turn(
                &trace_id,
                vec![ChatMessage::user("judge this")],
                Some(&profile),
                CancelSignal::never(),
            )
            .await
            .unwrap();

        // Critic has no tools, so none were advertised.
        assert!(backend.requests()[0].tools.is_empty());
        assert_eq!(
            backend.requests()[0].system.as_deref(),
            Some(profile.system_prompt.as_str())
        );
    }

    #[tokio::test]
    async fn skill_prefixed_tools_route_to_the_dispatcher() {
        struct FakeSkills;

        #[async_trait::async_trait]
        impl SkillDispatch for FakeSkills {
            async fn dispatch(&self, tool_name: &str, _arguments: Value) -> ToolResult {
                ToolResult::success(json!({"skill": tool_name, "summary": "three PRs merged"}))
            }
        }

        // Classify the skill as safe so no approval blocks the test.
        let approval_config = ApprovalConfig {
            overrides: vigil_types::SafetyOverrides::new()
                .with_override("skill_summarize", vigil_types::SafetyLevel::Safe),
            ..ApprovalConfig::default()
        };
        let backend = ScriptedBackend::new(vec![
            tool_reply("toolu_s", "skill_summarize", json!({"window": "today"})),
            text_reply("Summary ready."),
        ]);
        let (brain, recorder, _) =
            build_brain(backend.clone(), approval_config, AgentConfig::default());
        let brain = brain.with_skills(Arc::new(FakeSkills));

        let trace_id = recorder.start_trace("summarize my day");
        let text = brain
            .run_turn(
                &trace_id,
                vec![ChatMessage::user("summarize my day")],
                None,
                CancelSignal::never(),
            )
            .await
            .unwrap();
        assert_eq!(text, "Summary ready.");

        // The dispatcher's result reached the model under the call id.
        let tool_msg = backend.requests()[1]
            .messages
            .iter()
            .find(|m| m.tool_call_id.is_some())
            .cloned()
            .unwrap();
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("toolu_s"));
        assert!(tool_msg.content.contains("three PRs merged"));

        // Recorded as an mcp_call span, not a tool_exec one.
        recorder.end_trace(&trace_id, &text, TraceStatus::Completed);
        let trace = recorder.get(&trace_id).unwrap();
        assert!(trace.spans.iter().any(|s| s.kind == SpanKind::McpCall));
        assert!(!trace.spans.iter().any(|s| s.kind == SpanKind::ToolExec));
    }

    #[tokio::test]
    async fn provider_failure_surfaces_as_unavailable() {
        let backend = ScriptedBackend::new(vec![]);
        let (brain, recorder, _) = build_brain(
            backend,
            ApprovalConfig::default(),
            AgentConfig::default(),
        );
        let trace_id = recorder.start_trace("hi");
        let err = brain
            .run_turn(
                &trace_id,
                vec![ChatMessage::user("hi")],
                None,
                CancelSignal::never(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ProviderUnavailable));
    }
}

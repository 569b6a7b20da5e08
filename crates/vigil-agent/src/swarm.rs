//! The swarm orchestrator: a bounded coder/reviewer/critic loop with
//! dynamic routing to specialist roles.
//!
//! One run walks: optional planner, then up to `max_iterations` rounds of
//! coder followed by reviewer. A reviewer verdict of `APPROVED` hands the
//! artifact to the hostile critic; anything else feeds accumulated
//! feedback (optionally via a routed specialist report) back to the
//! coder. Oversized feedback is compressed with one low-temperature model
//! call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use regex::Regex;
use serde::{Deserialize, Serialize};

use vigil_trace::{SpanKind, SpanStatus, TraceRecorder};
use vigil_types::config::SwarmConfig;
use vigil_types::{
    ChatMessage, CompletionRequest, EventSink, GatewayError, GatewayEvent, SwarmId, TraceId,
};

use crate::brain::Brain;
use crate::cancel::CancelSignal;
use crate::profiles::{builtin_profile, AgentRole};

/// Thinking-stream fragments are clipped to this length.
const THINKING_CLIP: usize = 2000;

/// Lifecycle of a swarm run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwarmStatus {
    Running,
    Approved,
    Rejected,
    Exhausted,
    Error,
}

/// Snapshot of an in-flight run, for the UI's swarm visualization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwarmRun {
    pub id: SwarmId,
    pub task: String,
    pub iteration: u32,
    pub current_role: AgentRole,
    pub status: SwarmStatus,
}

/// Final result of a swarm run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwarmResult {
    pub id: SwarmId,
    pub status: SwarmStatus,
    pub artifact: String,
    pub review: String,
    pub iterations: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    pub agents_used: Vec<AgentRole>,
}

/// Runs role-specialized brains in the review loop.
pub struct SwarmOrchestrator {
    brain: Arc<Brain>,
    recorder: Arc<TraceRecorder>,
    events: Arc<dyn EventSink>,
    config: SwarmConfig,
    hint: Mutex<Option<String>>,
    active: Mutex<HashMap<SwarmId, SwarmRun>>,
}

impl SwarmOrchestrator {
    pub fn new(
        brain: Arc<Brain>,
        recorder: Arc<TraceRecorder>,
        events: Arc<dyn EventSink>,
        config: SwarmConfig,
    ) -> Self {
        Self {
            brain,
            recorder,
            events,
            config,
            hint: Mutex::new(None),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Deliver a human hint; the next coder iteration sees it as an
    /// urgent user message.
    pub fn deliver_hint(&self, text: impl Into<String>) {
        *self.hint.lock().expect("hint poisoned") = Some(text.into());
    }

    /// In-flight runs, for the dashboard.
    pub fn active_runs(&self) -> Vec<SwarmRun> {
        self.active
            .lock()
            .expect("active runs poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Execute a task through the swarm loop.
    pub async fn run(
        &self,
        trace_id: &TraceId,
        task: &str,
        include_planner: bool,
        cancel: CancelSignal,
    ) -> Result<SwarmResult, GatewayError> {
        let run_id = SwarmId::generate();
        self.track(&run_id, task, 0, AgentRole::Planner, SwarmStatus::Running);
        let result = self
            .run_inner(&run_id, trace_id, task, include_planner, cancel)
            .await;
        self.active
            .lock()
            .expect("active runs poisoned")
            .remove(&run_id);
        result
    }

    async fn run_inner(
        &self,
        run_id: &SwarmId,
        trace_id: &TraceId,
        task: &str,
        include_planner: bool,
        cancel: CancelSignal,
    ) -> Result<SwarmResult, GatewayError> {
        let max_iterations = self.config.max_iterations.max(1);
        let mut agents_used: Vec<AgentRole> = Vec::new();
        let mut task = task.to_string();

        if include_planner {
            self.track(run_id, &task, 0, AgentRole::Planner, SwarmStatus::Running);
            let plan = self
                .run_phase(
                    trace_id,
                    AgentRole::Planner,
                    format!("Break this task into an ordered plan:\n\n{task}"),
                    &cancel,
                )
                .await?;
            agents_used.push(AgentRole::Planner);
            task = format!("Plan:\n{plan}\n\nOriginal task:\n{task}");
        }

        let mut artifact = String::new();
        let mut feedback = String::new();
        let mut review = String::new();

        for iteration in 1..=max_iterations {
            // Coder phase.
            self.track(run_id, &task, iteration, AgentRole::Coder, SwarmStatus::Running);
            let hint = self.hint.lock().expect("hint poisoned").take();
            let coder_prompt = coder_prompt(&task, &artifact, &feedback, iteration, hint);
            artifact = self
                .run_phase(trace_id, AgentRole::Coder, coder_prompt, &cancel)
                .await?;
            push_unique(&mut agents_used, AgentRole::Coder);

            // Reviewer phase.
            self.track(run_id, &task, iteration, AgentRole::Reviewer, SwarmStatus::Running);
            review = self
                .run_phase(
                    trace_id,
                    AgentRole::Reviewer,
                    format!(
                        "Task:\n{}\n\nCode to review:\n```\n{artifact}\n```\n\n\
                         List every problem you find. If the code is acceptable, \
                         respond exactly: APPROVED",
                        clip(&task, 500)
                    ),
                    &cancel,
                )
                .await?;
            push_unique(&mut agents_used, AgentRole::Reviewer);

            if review.to_uppercase().contains("APPROVED") {
                tracing::info!(iteration, "swarm artifact approved by reviewer");
                self.track(run_id, &task, iteration, AgentRole::Critic, SwarmStatus::Running);
                let critic = self
                    .run_phase(
                        trace_id,
                        AgentRole::Critic,
                        format!(
                            "Task:\n{}\n\nApproved artifact:\n```\n{artifact}\n```\n\n\
                             Judge it.",
                            clip(&task, 500)
                        ),
                        &cancel,
                    )
                    .await?;
                push_unique(&mut agents_used, AgentRole::Critic);
                let (status, warning) = parse_critic_verdict(&critic);
                return Ok(SwarmResult {
                    id: run_id.clone(),
                    status,
                    artifact,
                    review,
                    iterations: iteration,
                    warning,
                    agents_used,
                });
            }

            // Not approved: route to a specialist if directed, otherwise
            // feed the review straight back.
            if let Some(role) = parse_route_directive(&review) {
                tracing::info!(role = %role, iteration, "reviewer routed to specialist");
                self.track(run_id, &task, iteration, role, SwarmStatus::Running);
                let report = self
                    .run_phase(
                        trace_id,
                        role,
                        format!("Examine this code:\n```\n{artifact}\n```\n\nReviewer notes:\n{review}"),
                        &cancel,
                    )
                    .await?;
                push_unique(&mut agents_used, role);
                feedback.push_str(&format!("\n[{role} report, iteration {iteration}]\n{report}\n"));
            } else {
                feedback.push_str(&format!("\n[review, iteration {iteration}]\n{review}\n"));
            }

            if iteration >= 2 && feedback.chars().count() > self.config.feedback_limit_chars {
                feedback = self.compress_feedback(feedback).await;
            }
        }

        tracing::warn!(max_iterations, "swarm exhausted its iteration budget");
        Ok(SwarmResult {
            id: run_id.clone(),
            status: SwarmStatus::Exhausted,
            artifact,
            review,
            iterations: max_iterations,
            warning: Some("iteration budget exhausted without reviewer approval".into()),
            agents_used,
        })
    }

    async fn run_phase(
        &self,
        trace_id: &TraceId,
        role: AgentRole,
        prompt: String,
        cancel: &CancelSignal,
    ) -> Result<String, GatewayError> {
        let span = self
            .recorder
            .start_span(trace_id, SpanKind::Delegation, role.as_str(), None);
        self.events.emit(GatewayEvent::AgentSpawned {
            role: role.to_string(),
        });

        let profile = builtin_profile(role);
        let result = self
            .brain
            .run_turn(
                trace_id,
                vec![ChatMessage::user(prompt)],
                Some(&profile),
                cancel.clone(),
            )
            .await;

        match result {
            Ok(text) => {
                self.events.emit(GatewayEvent::AgentCompleted {
                    role: role.to_string(),
                });
                self.events.emit(GatewayEvent::ThinkingStream {
                    text: clip(&text, THINKING_CLIP),
                    agent: Some(role.to_string()),
                    new_turn: Some(true),
                });
                self.recorder.end_span(
                    &span,
                    SpanStatus::Ok,
                    vec![("role".into(), role.to_string())],
                );
                Ok(text)
            }
            Err(err) => {
                self.events.emit(GatewayEvent::AgentFailed {
                    role: role.to_string(),
                });
                self.recorder.end_span(
                    &span,
                    SpanStatus::Error,
                    vec![
                        ("role".into(), role.to_string()),
                        ("error.kind".into(), err.kind().to_string()),
                    ],
                );
                Err(err)
            }
        }
    }

    /// One low-temperature call to shrink accumulated feedback; falls
    /// back to keeping the most recent tail (with the last directive)
    /// when the call fails.
    async fn compress_feedback(&self, feedback: String) -> String {
        let request = CompletionRequest {
            system: Some(
                "You compress code-review feedback. Keep every actionable item and any \
                 ROUTE directive; drop pleasantries and repetition."
                    .into(),
            ),
            messages: vec![ChatMessage::user(format!(
                "Compress this feedback to its essentials:\n\n{feedback}"
            ))],
            temperature: Some(0.1),
            max_tokens: Some(1024),
            tools: Vec::new(),
        };
        match self.brain.router().complete(&request, None).await {
            Ok((response, _)) if !response.content.trim().is_empty() => response.content,
            _ => {
                tracing::warn!("feedback compression failed, truncating instead");
                truncate_feedback(&feedback, self.config.feedback_limit_chars)
            }
        }
    }

    fn track(
        &self,
        run_id: &SwarmId,
        task: &str,
        iteration: u32,
        role: AgentRole,
        status: SwarmStatus,
    ) {
        self.active.lock().expect("active runs poisoned").insert(
            run_id.clone(),
            SwarmRun {
                id: run_id.clone(),
                task: clip(task, 100),
                iteration,
                current_role: role,
                status,
            },
        );
    }
}

/// The coder prompt: hint first, then task, previous artifact, feedback.
fn coder_prompt(
    task: &str,
    artifact: &str,
    feedback: &str,
    iteration: u32,
    hint: Option<String>,
) -> String {
    let mut prompt = String::new();
    if let Some(hint) = hint {
        prompt.push_str(&format!("[URGENT USER MESSAGE]\n{hint}\n\n"));
    }
    prompt.push_str(&format!("Task:\n{task}\n"));
    if !artifact.is_empty() {
        prompt.push_str(&format!("\nPrevious code:\n```\n{artifact}\n```\n"));
    }
    if !feedback.is_empty() {
        prompt.push_str(&format!(
            "\nFeedback (iteration {iteration}):\n{feedback}\n\
             Correct the code, addressing EVERY point raised.\n"
        ));
    }
    prompt
}

/// `ROUTE:security` or `ROUTE:tester`, case-insensitive.
fn parse_route_directive(review: &str) -> Option<AgentRole> {
    let re = Regex::new(r"(?i)ROUTE:\s*(security|tester)").ok()?;
    let captured = re.captures(review)?.get(1)?.as_str().to_lowercase();
    match captured.as_str() {
        "security" => Some(AgentRole::Security),
        "tester" => Some(AgentRole::Tester),
        _ => None,
    }
}

/// `VALID` approves; `REJECTED:<reason>` keeps the artifact but attaches
/// the critic's warning. The loop never reopens either way.
fn parse_critic_verdict(critic: &str) -> (SwarmStatus, Option<String>) {
    if let Some(idx) = critic.find("REJECTED:") {
        let reason = critic[idx + "REJECTED:".len()..]
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        return (SwarmStatus::Rejected, Some(format!("critic rejected: {reason}")));
    }
    let valid = Regex::new(r"\bVALID\b")
        .map(|re| re.is_match(&critic.to_uppercase()))
        .unwrap_or(false);
    if valid {
        (SwarmStatus::Approved, None)
    } else {
        (
            SwarmStatus::Approved,
            Some(format!("critic verdict unclear: {}", clip(critic, 200))),
        )
    }
}

/// Keep the most recent `limit` characters, re-attaching the last ROUTE
/// directive if truncation dropped it.
fn truncate_feedback(feedback: &str, limit: usize) -> String {
    let chars: Vec<char> = feedback.chars().collect();
    if chars.len() <= limit {
        return feedback.to_string();
    }
    let tail: String = chars[chars.len() - limit..].iter().collect();
    let last_directive = feedback
        .lines()
        .rev()
        .find(|line| line.to_uppercase().contains("ROUTE:"));
    match last_directive {
        Some(directive) if !tail.contains(directive) => {
            format!("{directive}\n{tail}")
        }
        _ => tail,
    }
}

fn push_unique(agents: &mut Vec<AgentRole>, role: AgentRole) {
    if !agents.contains(&role) {
        agents.push(role);
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}

//! The per-process request gateway.
//!
//! Owns the wiring: session store, trace recorder, approval broker, tool
//! executor, provider router, brain, swarm, and self-healing executor.
//! Admission control is a bounded worker pool with a bounded wait queue;
//! every request carries a deadline that cancels in-flight work and
//! closes its trace as timed out.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use vigil_approval::ApprovalBroker;
use vigil_provider::{CompletionBackend, EndpointHealth, HttpBackend, ProviderRouter};
use vigil_tools::ToolExecutor;
use vigil_trace::{TraceRecorder, TraceStatus};
use vigil_types::{
    ChatMessage, ClientEvent, EventSink, GatewayConfig, GatewayError, GatewayEvent, SessionId,
};

use crate::brain::Brain;
use crate::cancel::cancel_pair;
use crate::heal::{HealOutcome, SelfHealingExecutor};
use crate::session::SessionStore;
use crate::swarm::{SwarmOrchestrator, SwarmResult};

/// How a request wants to be executed. `Auto` behaves as `Chat`; the
/// swarm engages only when the caller asks for `Code` (and the swarm is
/// enabled).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Chat,
    Code,
    Auto,
}

/// The assembled gateway.
pub struct Gateway {
    config: GatewayConfig,
    sessions: SessionStore,
    recorder: Arc<TraceRecorder>,
    approvals: Arc<ApprovalBroker>,
    brain: Arc<Brain>,
    swarm: Arc<SwarmOrchestrator>,
    healer: Arc<SelfHealingExecutor>,
    events: Arc<dyn EventSink>,
    workers: Semaphore,
    queue_slots: Semaphore,
}

impl Gateway {
    /// Wire the gateway over the production HTTP transport.
    pub fn new(config: GatewayConfig, events: Arc<dyn EventSink>) -> Result<Self, GatewayError> {
        let backend = HttpBackend::new()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        Self::with_backend(config, events, Arc::new(backend))
    }

    /// Wire the gateway over an injected transport (tests, proxies).
    pub fn with_backend(
        config: GatewayConfig,
        events: Arc<dyn EventSink>,
        backend: Arc<dyn CompletionBackend>,
    ) -> Result<Self, GatewayError> {
        let recorder = Arc::new(TraceRecorder::new(&config.tracing));
        let approvals = Arc::new(ApprovalBroker::new(config.approval.clone(), events.clone()));
        let executor = Arc::new(
            ToolExecutor::with_builtins(&config.tools, recorder.clone())
                .map_err(GatewayError::Config)?,
        );
        let router = Arc::new(ProviderRouter::new(config.providers.clone(), backend));
        let brain = Arc::new(Brain::new(
            router.clone(),
            executor.clone(),
            approvals.clone(),
            recorder.clone(),
            events.clone(),
            config.agent.clone(),
        ));
        let swarm = Arc::new(SwarmOrchestrator::new(
            brain.clone(),
            recorder.clone(),
            events.clone(),
            config.agent.swarm.clone(),
        ));
        let healer = Arc::new(SelfHealingExecutor::new(
            router,
            executor,
            recorder.clone(),
            config.agent.heal.clone(),
        ));

        Ok(Self {
            sessions: SessionStore::new(),
            recorder,
            approvals,
            brain,
            swarm,
            healer,
            events,
            workers: Semaphore::new(config.runtime.worker_count.max(1)),
            queue_slots: Semaphore::new(config.runtime.queue_depth),
            config,
        })
    }

    /// Handle one user request end to end. Returns the assistant's reply.
    pub async fn handle(
        &self,
        session_id: &SessionId,
        text: &str,
        mode: RequestMode,
    ) -> Result<String, GatewayError> {
        // Admission: take a worker if one is free; otherwise wait in the
        // bounded queue. A full queue rejects immediately.
        let _worker = match self.workers.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                let queued = self
                    .queue_slots
                    .try_acquire()
                    .map_err(|_| GatewayError::ResourceExhausted)?;
                let permit = self
                    .workers
                    .acquire()
                    .await
                    .map_err(|_| GatewayError::Internal("worker pool closed".into()))?;
                drop(queued);
                permit
            }
        };

        let turn = self.sessions.begin_turn(session_id)?;
        let trace_id = self.recorder.start_trace(text);
        self.events.emit(GatewayEvent::Start {
            session_id: session_id.to_string(),
            trace_id: trace_id.to_string(),
        });

        let history = {
            let mut session = turn.session().lock().expect("session poisoned");
            session.push(ChatMessage::user(text));
            session.messages()
        };

        let mode = self.effective_mode(mode);
        let deadline = match mode {
            RequestMode::Code => Duration::from_secs(self.config.agent.swarm.timeout_secs),
            _ => Duration::from_secs(self.config.agent.turn_timeout_secs),
        };

        let (cancel_handle, cancel_signal) = cancel_pair();
        let work = async {
            match mode {
                RequestMode::Code => {
                    let result = self
                        .swarm
                        .run(&trace_id, text, false, cancel_signal.clone())
                        .await?;
                    Ok(render_swarm_reply(&result))
                }
                _ => {
                    self.brain
                        .run_turn(&trace_id, history, None, cancel_signal.clone())
                        .await
                }
            }
        };

        let outcome = match tokio::time::timeout(deadline, work).await {
            Ok(result) => result,
            Err(_) => {
                cancel_handle.cancel();
                self.recorder.timeout_trace(&trace_id, "");
                self.events.emit(GatewayEvent::End);
                tracing::warn!(session = %session_id, "request deadline exceeded");
                return Err(GatewayError::DeadlineExceeded);
            }
        };

        match outcome {
            Ok(reply) => {
                {
                    let mut session = turn.session().lock().expect("session poisoned");
                    session.push(ChatMessage::assistant(reply.clone()));
                }
                self.recorder
                    .end_trace(&trace_id, &reply, TraceStatus::Completed);
                self.events.emit(GatewayEvent::End);
                Ok(reply)
            }
            Err(err) => {
                self.recorder
                    .end_trace(&trace_id, &err.user_message(), TraceStatus::Error);
                self.events.emit(GatewayEvent::End);
                tracing::error!(session = %session_id, error = %err, "turn failed");
                Err(err)
            }
        }
    }

    /// Run a code snippet through the self-healing executor under its own
    /// trace.
    pub async fn execute_code(&self, code: &str) -> HealOutcome {
        let trace_id = self.recorder.start_trace("[code execution]");
        let (_handle, signal) = cancel_pair();
        let outcome = self.healer.run_code(&trace_id, code, signal).await;
        let status = if outcome.ok {
            TraceStatus::Completed
        } else {
            TraceStatus::Error
        };
        self.recorder.end_trace(&trace_id, "", status);
        outcome
    }

    /// Apply an inbound UI frame.
    pub fn handle_client_event(&self, event: ClientEvent) {
        match event {
            ClientEvent::ApprovalResponse {
                approval_id,
                approved,
                trust_minutes,
            } => {
                self.approvals
                    .resolve(&approval_id.into(), approved, trust_minutes);
            }
            ClientEvent::BatchApproval {
                approval_ids,
                approved,
                trust_minutes,
            } => {
                let ids: Vec<_> = approval_ids.into_iter().map(Into::into).collect();
                self.approvals.batch_resolve(&ids, approved, trust_minutes);
            }
            ClientEvent::HumanHint { text } => {
                self.swarm.deliver_hint(text);
            }
        }
    }

    fn effective_mode(&self, mode: RequestMode) -> RequestMode {
        match mode {
            RequestMode::Code if self.config.agent.swarm.enabled => RequestMode::Code,
            RequestMode::Code => RequestMode::Chat,
            RequestMode::Auto => RequestMode::Chat,
            RequestMode::Chat => RequestMode::Chat,
        }
    }

    // -- Component access for the API layer ---------------------------------

    pub fn recorder(&self) -> &Arc<TraceRecorder> {
        &self.recorder
    }

    pub fn approvals(&self) -> &Arc<ApprovalBroker> {
        &self.approvals
    }

    pub fn swarm(&self) -> &Arc<SwarmOrchestrator> {
        &self.swarm
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn provider_health(&self) -> Vec<EndpointHealth> {
        self.brain.router().health()
    }

    /// Redacted flat view of the live configuration.
    pub fn config_view(&self) -> std::collections::BTreeMap<String, String> {
        self.config.flatten_redacted()
    }
}

fn render_swarm_reply(result: &SwarmResult) -> String {
    match &result.warning {
        Some(warning) => format!("{}\n\n[warning: {warning}]", result.artifact),
        None => result.artifact.clone(),
    }
}

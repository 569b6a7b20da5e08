//! Score-ranked endpoint selection with failover.
//!
//! On every call the router re-evaluates which endpoints are selectable
//! (enabled, circuit closed, rate-limit token available), ranks them by
//! score, and walks the ranking until a completion succeeds. Failures
//! open the endpoint's circuit; the next turn naturally routes around it.

use std::sync::Arc;
use std::time::Instant;

use vigil_trace::{SpanKind, SpanStatus, TraceRecorder};
use vigil_types::{CompletionRequest, CompletionResponse, EndpointConfig, TraceId};

use crate::backend::{CompletionBackend, HttpBackend, ProviderError};
use crate::endpoint::{EndpointHealth, EndpointState};

/// Routes completion requests across configured endpoints.
pub struct ProviderRouter {
    endpoints: Vec<Arc<EndpointState>>,
    backend: Arc<dyn CompletionBackend>,
}

impl ProviderRouter {
    pub fn new(configs: Vec<EndpointConfig>, backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            endpoints: configs
                .into_iter()
                .map(|config| Arc::new(EndpointState::new(config)))
                .collect(),
            backend,
        }
    }

    /// Router backed by the production HTTP transport.
    pub fn over_http(configs: Vec<EndpointConfig>) -> Result<Self, ProviderError> {
        Ok(Self::new(configs, Arc::new(HttpBackend::new()?)))
    }

    /// Complete `request` on the best available endpoint, failing over on
    /// transient errors. Returns the response and the name of the
    /// endpoint that served it.
    ///
    /// With a trace context, every endpoint attempt records its own
    /// `llm_call` span -- a failover turn shows one errored span followed
    /// by one successful span.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        trace: Option<(&TraceRecorder, &TraceId)>,
    ) -> Result<(CompletionResponse, String), ProviderError> {
        request
            .validate()
            .map_err(ProviderError::Rejected)?;

        let mut candidates: Vec<Arc<EndpointState>> = self
            .endpoints
            .iter()
            .filter(|ep| ep.is_selectable())
            .cloned()
            .collect();
        candidates.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut last_error: Option<ProviderError> = None;
        let mut attempted = false;
        for endpoint in candidates {
            if !endpoint.try_acquire_slot() {
                tracing::debug!(endpoint = %endpoint.config.name, "locally rate-limited, skipping");
                continue;
            }
            attempted = true;

            let span = trace.map(|(recorder, trace_id)| {
                recorder.start_span(trace_id, SpanKind::LlmCall, "completion", None)
            });
            let started = Instant::now();
            match self.backend.complete(&endpoint.config, request).await {
                Ok(response) => {
                    let latency = started.elapsed().as_millis() as u64;
                    endpoint.record_success(latency);
                    if let (Some(span), Some((recorder, _))) = (&span, trace) {
                        recorder.end_span(
                            span,
                            SpanStatus::Ok,
                            vec![
                                ("endpoint".into(), endpoint.config.name.clone()),
                                ("model".into(), response.model.clone()),
                                ("latency_ms".into(), latency.to_string()),
                                (
                                    "input_tokens".into(),
                                    response.usage.input_tokens.to_string(),
                                ),
                                (
                                    "output_tokens".into(),
                                    response.usage.output_tokens.to_string(),
                                ),
                            ],
                        );
                    }
                    tracing::info!(
                        endpoint = %endpoint.config.name,
                        latency_ms = latency,
                        "completion succeeded"
                    );
                    return Ok((response, endpoint.config.name.clone()));
                }
                Err(err) => {
                    endpoint.record_failure();
                    if let (Some(span), Some((recorder, _))) = (&span, trace) {
                        recorder.end_span(
                            span,
                            SpanStatus::Error,
                            vec![
                                ("endpoint".into(), endpoint.config.name.clone()),
                                ("error.kind".into(), "provider".into()),
                            ],
                        );
                    }
                    tracing::warn!(
                        endpoint = %endpoint.config.name,
                        error = %err,
                        "completion failed, trying next endpoint"
                    );
                    last_error = Some(err);
                }
            }
        }

        if !attempted {
            return Err(ProviderError::Unavailable);
        }
        Err(last_error.unwrap_or(ProviderError::Unavailable))
    }

    /// Health snapshot of every endpoint, for the dashboard layer.
    pub fn health(&self) -> Vec<EndpointHealth> {
        self.endpoints.iter().map(|ep| ep.snapshot()).collect()
    }
}

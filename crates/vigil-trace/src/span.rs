//! Span and trace data model.
//!
//! Attribute values and event payloads are truncated at record time so a
//! single runaway tool result cannot bloat the ring buffer or the
//! persisted JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use vigil_types::{SpanId, TraceId};

/// Maximum bytes kept for one attribute value or serialized event payload.
pub const MAX_ATTR_BYTES: usize = 4096;

/// Maximum attributes per span; later writes are dropped.
pub const MAX_ATTRS_PER_SPAN: usize = 32;

/// Stored user input / final response are clipped to this length.
pub const MAX_RECORDED_TEXT: usize = 500;

/// What kind of pipeline step a span represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    Request,
    Retrieval,
    LlmCall,
    ToolExec,
    SelfHeal,
    Delegation,
    McpCall,
    Approval,
    Response,
}

/// Terminal (or in-flight) state of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Error,
    Timeout,
    Active,
}

/// Terminal (or in-flight) state of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Active,
    Completed,
    Error,
}

/// A timestamped event attached to a span.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanEvent {
    pub name: String,
    /// Unix epoch milliseconds.
    pub timestamp_ms: i64,
    pub payload: Value,
}

/// One node of a trace tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Span {
    pub span_id: SpanId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<SpanId>,
    pub kind: SpanKind,
    pub name: String,
    pub start_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<i64>,
    pub status: SpanStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<SpanEvent>,
}

impl Span {
    pub fn new(kind: SpanKind, name: impl Into<String>, parent: Option<SpanId>) -> Self {
        Self {
            span_id: SpanId::generate(),
            parent_span_id: parent,
            kind,
            name: name.into(),
            start_ms: now_ms(),
            end_ms: None,
            status: SpanStatus::Active,
            attributes: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.end_ms.is_none()
    }

    /// Record an attribute, truncating the value and enforcing the per-span
    /// attribute cap. Existing keys are overwritten without consuming a
    /// new slot.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if self.attributes.len() >= MAX_ATTRS_PER_SPAN && !self.attributes.contains_key(&key) {
            return;
        }
        self.attributes.insert(key, clip(value.into(), MAX_ATTR_BYTES));
    }

    /// Append an event; the payload is clipped via its JSON serialization.
    pub fn add_event(&mut self, name: impl Into<String>, payload: Value) {
        let payload = clip_payload(payload);
        self.events.push(SpanEvent {
            name: name.into(),
            timestamp_ms: now_ms(),
            payload,
        });
    }

    /// Close the span. Idempotent: a closed span keeps its first outcome.
    pub fn finish(&mut self, status: SpanStatus) {
        if self.end_ms.is_some() {
            return;
        }
        let end = now_ms().max(self.start_ms);
        self.end_ms = Some(end);
        self.status = status;
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_ms.map(|end| end - self.start_ms)
    }
}

/// A complete trace for one user request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trace {
    pub trace_id: TraceId,
    pub user_input: String,
    #[serde(default)]
    pub final_response: String,
    pub start_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ms: Option<i64>,
    pub status: TraceStatus,
    pub spans: Vec<Span>,
}

impl Trace {
    pub fn new(user_input: impl Into<String>) -> Self {
        Self {
            trace_id: TraceId::generate(),
            user_input: clip(user_input.into(), MAX_RECORDED_TEXT),
            final_response: String::new(),
            start_ms: now_ms(),
            end_ms: None,
            status: TraceStatus::Active,
            spans: Vec::new(),
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_ms.map(|end| end - self.start_ms)
    }

    /// Close the trace, clipping the response text.
    pub fn finish(&mut self, final_response: &str, status: TraceStatus) {
        self.final_response = clip(final_response.to_string(), MAX_RECORDED_TEXT);
        self.end_ms = Some(now_ms().max(self.start_ms));
        self.status = status;
    }

    /// Compact view for listings.
    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            trace_id: self.trace_id.clone(),
            user_input: clip(self.user_input.clone(), 100),
            status: self.status,
            duration_ms: self.duration_ms(),
            span_count: self.spans.len(),
            start_ms: self.start_ms,
        }
    }
}

/// Listing row for a trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraceSummary {
    pub trace_id: TraceId,
    pub user_input: String,
    pub status: TraceStatus,
    pub duration_ms: Option<i64>,
    pub span_count: usize,
    pub start_ms: i64,
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn clip(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
    }
    s
}

fn clip_payload(payload: Value) -> Value {
    let serialized = payload.to_string();
    if serialized.len() <= MAX_ATTR_BYTES {
        return payload;
    }
    Value::String(clip(serialized, MAX_ATTR_BYTES))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn span_end_never_precedes_start() {
        let mut span = Span::new(SpanKind::LlmCall, "completion", None);
        span.finish(SpanStatus::Ok);
        assert!(span.end_ms.unwrap() >= span.start_ms);
        assert!(span.duration_ms().unwrap() >= 0);
    }

    #[test]
    fn span_finish_is_idempotent() {
        let mut span = Span::new(SpanKind::ToolExec, "shell", None);
        span.finish(SpanStatus::Error);
        let first_end = span.end_ms;
        span.finish(SpanStatus::Ok);
        assert_eq!(span.end_ms, first_end);
        assert_eq!(span.status, SpanStatus::Error, "first outcome wins");
    }

    #[test]
    fn attribute_value_truncated_and_count_capped() {
        let mut span = Span::new(SpanKind::ToolExec, "shell", None);
        span.set_attribute("big", "x".repeat(MAX_ATTR_BYTES * 2));
        assert_eq!(span.attributes["big"].len(), MAX_ATTR_BYTES);

        for i in 0..MAX_ATTRS_PER_SPAN + 10 {
            span.set_attribute(format!("k{i}"), "v");
        }
        assert_eq!(span.attributes.len(), MAX_ATTRS_PER_SPAN);

        // Overwriting an existing key still works at the cap.
        span.set_attribute("big", "small now");
        assert_eq!(span.attributes["big"], "small now");
    }

    #[test]
    fn oversized_event_payload_is_clipped() {
        let mut span = Span::new(SpanKind::Response, "final", None);
        span.add_event("chunk", json!({"text": "y".repeat(MAX_ATTR_BYTES * 2)}));
        let stored = span.events[0].payload.to_string();
        assert!(stored.len() <= MAX_ATTR_BYTES + 2);
    }

    #[test]
    fn trace_round_trips_through_json() {
        let mut trace = Trace::new("do the thing");
        let mut span = Span::new(SpanKind::Request, "request", None);
        span.set_attribute("session", "sess_1");
        span.add_event("received", json!({"bytes": 12}));
        span.finish(SpanStatus::Ok);
        trace.spans.push(span);
        trace.finish("done", TraceStatus::Completed);

        let json = serde_json::to_string(&trace).unwrap();
        let back: Trace = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trace);
    }
}

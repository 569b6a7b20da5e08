//! The process-wide trace recorder.
//!
//! Traces in flight live in a map of per-trace mutexes, so concurrent
//! requests never contend on each other's spans; there is no global write
//! lock. Completed traces move into a bounded ring buffer and, when
//! persistence is enabled, onto disk as one JSON file per trace (written
//! to a temp file and atomically renamed).

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use vigil_types::config::TracingConfig;
use vigil_types::{SpanId, TraceId};

use crate::span::{Span, SpanKind, SpanStatus, Trace, TraceStatus, TraceSummary};

struct ActiveTrace {
    trace: Trace,
    /// Stack of currently-open span ids, most recently opened last.
    open_spans: Vec<SpanId>,
}

/// Aggregate statistics over recorded traces.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct TraceStats {
    pub total: usize,
    pub active: usize,
    pub completed: usize,
    pub errors: usize,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: i64,
}

/// Records request traces. Cheap to share behind an `Arc`.
pub struct TraceRecorder {
    enabled: bool,
    max_traces: usize,
    persist: bool,
    store_path: PathBuf,
    active: RwLock<HashMap<TraceId, Arc<Mutex<ActiveTrace>>>>,
    span_index: Mutex<HashMap<SpanId, TraceId>>,
    completed: Mutex<VecDeque<Trace>>,
}

impl TraceRecorder {
    pub fn new(config: &TracingConfig) -> Self {
        if config.enabled && config.persist {
            if let Err(e) = fs::create_dir_all(&config.store_path) {
                tracing::warn!(
                    path = %config.store_path.display(),
                    error = %e,
                    "could not create trace directory, persistence disabled"
                );
            }
        }
        Self {
            enabled: config.enabled,
            max_traces: config.max_traces.max(1),
            persist: config.persist,
            store_path: config.store_path.clone(),
            active: RwLock::new(HashMap::new()),
            span_index: Mutex::new(HashMap::new()),
            completed: Mutex::new(VecDeque::new()),
        }
    }

    /// Recorder with defaults, persisting nothing. Intended for tests.
    pub fn in_memory() -> Self {
        Self::new(&TracingConfig {
            enabled: true,
            max_traces: 500,
            persist: false,
            store_path: PathBuf::from("traces"),
        })
    }

    /// Open a new trace with its root `request` span.
    pub fn start_trace(&self, user_input: &str) -> TraceId {
        let mut trace = Trace::new(user_input);
        let trace_id = trace.trace_id.clone();
        if !self.enabled {
            return trace_id;
        }

        let root = Span::new(SpanKind::Request, "request", None);
        let root_id = root.span_id.clone();
        trace.spans.push(root);

        self.span_index
            .lock()
            .expect("span index poisoned")
            .insert(root_id.clone(), trace_id.clone());
        self.active.write().expect("active map poisoned").insert(
            trace_id.clone(),
            Arc::new(Mutex::new(ActiveTrace {
                trace,
                open_spans: vec![root_id],
            })),
        );

        tracing::debug!(trace_id = %trace_id, "trace started");
        trace_id
    }

    /// Open a child span. When `parent` is not given, the most recently
    /// opened span of the trace becomes the parent.
    pub fn start_span(
        &self,
        trace_id: &TraceId,
        kind: SpanKind,
        name: &str,
        parent: Option<&SpanId>,
    ) -> SpanId {
        let Some(entry) = self.active_entry(trace_id) else {
            // Unknown trace: hand back an id that later calls ignore.
            return SpanId::generate();
        };
        let mut state = entry.lock().expect("trace poisoned");
        let parent_id = parent
            .cloned()
            .or_else(|| state.open_spans.last().cloned());
        let span = Span::new(kind, name, parent_id);
        let span_id = span.span_id.clone();
        state.trace.spans.push(span);
        state.open_spans.push(span_id.clone());
        drop(state);

        self.span_index
            .lock()
            .expect("span index poisoned")
            .insert(span_id.clone(), trace_id.clone());
        span_id
    }

    /// Close a span with its outcome and final attributes. Idempotent.
    pub fn end_span(
        &self,
        span_id: &SpanId,
        status: SpanStatus,
        attributes: Vec<(String, String)>,
    ) {
        self.with_span(span_id, |state, idx| {
            let span = &mut state.trace.spans[idx];
            for (key, value) in attributes {
                span.set_attribute(key, value);
            }
            span.finish(status);
            let id = span.span_id.clone();
            state.open_spans.retain(|open| *open != id);
        });
    }

    /// Append an event to an open span.
    pub fn record_event(&self, span_id: &SpanId, name: &str, payload: Value) {
        self.with_span(span_id, |state, idx| {
            state.trace.spans[idx].add_event(name, payload);
        });
    }

    /// Close a trace cleanly: any still-open span inherits the terminal
    /// status, the trace moves to the ring buffer, and it is persisted.
    pub fn end_trace(&self, trace_id: &TraceId, final_response: &str, status: TraceStatus) {
        let open_status = match status {
            TraceStatus::Error => SpanStatus::Error,
            _ => SpanStatus::Ok,
        };
        self.finish_trace(trace_id, final_response, status, open_status);
    }

    /// Close a trace whose request ran past its deadline: open spans
    /// (including the root) close as `timeout`.
    pub fn timeout_trace(&self, trace_id: &TraceId, partial_response: &str) {
        self.finish_trace(
            trace_id,
            partial_response,
            TraceStatus::Error,
            SpanStatus::Timeout,
        );
    }

    fn finish_trace(
        &self,
        trace_id: &TraceId,
        final_response: &str,
        status: TraceStatus,
        open_status: SpanStatus,
    ) {
        let Some(entry) = self
            .active
            .write()
            .expect("active map poisoned")
            .remove(trace_id)
        else {
            return;
        };
        let mut state = entry.lock().expect("trace poisoned");

        {
            let mut index = self.span_index.lock().expect("span index poisoned");
            for span in &state.trace.spans {
                index.remove(&span.span_id);
            }
        }
        for span in state.trace.spans.iter_mut().filter(|s| s.is_open()) {
            span.finish(open_status);
        }
        state.trace.finish(final_response, status);
        let trace = state.trace.clone();
        drop(state);

        tracing::debug!(
            trace_id = %trace_id,
            status = ?status,
            spans = trace.spans.len(),
            duration_ms = trace.duration_ms().unwrap_or_default(),
            "trace completed"
        );

        if self.persist {
            self.persist_trace(&trace);
        }

        let mut ring = self.completed.lock().expect("ring poisoned");
        if ring.len() >= self.max_traces {
            ring.pop_front();
        }
        ring.push_back(trace);
    }

    // -- Read-only views ----------------------------------------------------

    /// Most recent traces first, active ones included.
    pub fn list(&self, limit: usize) -> Vec<TraceSummary> {
        let mut summaries: Vec<TraceSummary> = self
            .completed
            .lock()
            .expect("ring poisoned")
            .iter()
            .map(Trace::summary)
            .collect();
        for entry in self.active.read().expect("active map poisoned").values() {
            summaries.push(entry.lock().expect("trace poisoned").trace.summary());
        }
        summaries.sort_by(|a, b| b.start_ms.cmp(&a.start_ms));
        summaries.truncate(limit);
        summaries
    }

    /// Snapshot of one trace: in-flight first, then the ring buffer, then
    /// the persisted file for traces already evicted.
    pub fn get(&self, trace_id: &TraceId) -> Option<Trace> {
        if let Some(entry) = self.active_entry(trace_id) {
            return Some(entry.lock().expect("trace poisoned").trace.clone());
        }
        if let Some(trace) = self
            .completed
            .lock()
            .expect("ring poisoned")
            .iter()
            .find(|t| &t.trace_id == trace_id)
        {
            return Some(trace.clone());
        }
        if self.persist {
            let path = self.trace_path(trace_id);
            if let Ok(contents) = fs::read_to_string(path) {
                return serde_json::from_str(&contents).ok();
            }
        }
        None
    }

    /// Case-insensitive substring search over recorded user inputs.
    pub fn search(&self, query: &str) -> Vec<TraceSummary> {
        let needle = query.to_lowercase();
        let mut results: Vec<TraceSummary> = self
            .completed
            .lock()
            .expect("ring poisoned")
            .iter()
            .filter(|t| t.user_input.to_lowercase().contains(&needle))
            .map(Trace::summary)
            .collect();
        for entry in self.active.read().expect("active map poisoned").values() {
            let state = entry.lock().expect("trace poisoned");
            if state.trace.user_input.to_lowercase().contains(&needle) {
                results.push(state.trace.summary());
            }
        }
        results.sort_by(|a, b| b.start_ms.cmp(&a.start_ms));
        results
    }

    pub fn stats(&self) -> TraceStats {
        let ring = self.completed.lock().expect("ring poisoned");
        let active = self.active.read().expect("active map poisoned").len();
        let completed = ring
            .iter()
            .filter(|t| t.status == TraceStatus::Completed)
            .count();
        let errors = ring.iter().filter(|t| t.status == TraceStatus::Error).count();

        let mut durations: Vec<i64> = ring.iter().filter_map(Trace::duration_ms).collect();
        durations.sort_unstable();
        let avg = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<i64>() as f64 / durations.len() as f64
        };
        let p95 = if durations.is_empty() {
            0
        } else {
            let idx = ((durations.len() as f64) * 0.95) as usize;
            durations[idx.min(durations.len() - 1)]
        };

        TraceStats {
            total: ring.len(),
            active,
            completed,
            errors,
            avg_duration_ms: avg,
            p95_duration_ms: p95,
        }
    }

    // -- Internals ----------------------------------------------------------

    fn active_entry(&self, trace_id: &TraceId) -> Option<Arc<Mutex<ActiveTrace>>> {
        self.active
            .read()
            .expect("active map poisoned")
            .get(trace_id)
            .cloned()
    }

    fn with_span(&self, span_id: &SpanId, f: impl FnOnce(&mut ActiveTrace, usize)) {
        let trace_id = {
            let index = self.span_index.lock().expect("span index poisoned");
            match index.get(span_id) {
                Some(id) => id.clone(),
                None => return,
            }
        };
        let Some(entry) = self.active_entry(&trace_id) else {
            return;
        };
        let mut state = entry.lock().expect("trace poisoned");
        if let Some(idx) = state
            .trace
            .spans
            .iter()
            .position(|s| &s.span_id == span_id)
        {
            f(&mut state, idx);
        }
    }

    fn trace_path(&self, trace_id: &TraceId) -> PathBuf {
        self.store_path.join(format!("{trace_id}.json"))
    }

    fn persist_trace(&self, trace: &Trace) {
        let path = self.trace_path(&trace.trace_id);
        let tmp = path.with_extension("json.tmp");
        let result = serde_json::to_vec_pretty(trace)
            .map_err(|e| e.to_string())
            .and_then(|bytes| fs::write(&tmp, bytes).map_err(|e| e.to_string()))
            .and_then(|()| fs::rename(&tmp, &path).map_err(|e| e.to_string()));
        if let Err(e) = result {
            tracing::error!(trace_id = %trace.trace_id, error = %e, "failed to persist trace");
        }
    }
}

//! Trace recording for the agent pipeline.
//!
//! Every user request produces one [`Trace`]: a tree of [`Span`]s covering
//! model calls, tool executions, approvals, self-heal attempts, and swarm
//! delegations. Traces live in a bounded in-memory ring buffer and are
//! optionally persisted as one JSON file each.

pub mod recorder;
pub mod span;

pub use recorder::{TraceRecorder, TraceStats};
pub use span::{Span, SpanEvent, SpanKind, SpanStatus, Trace, TraceStatus, TraceSummary};

//! Shared data model for the Vigil agent gateway.
//!
//! This is the foundation crate: typed identifiers, the error taxonomy,
//! chat/completion types with provider-format helpers, tool safety levels,
//! outbound/inbound UI event frames, and the gateway configuration.
//! Every other workspace crate depends on it; it depends on nothing
//! Vigil-specific.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod llm;
pub mod paths;
pub mod safety;

pub use config::{EndpointConfig, GatewayConfig, ProviderKind};
pub use error::GatewayError;
pub use events::{ClientEvent, EventSink, GatewayEvent, NullSink};
pub use ids::{ApprovalId, SessionId, SpanId, SwarmId, TraceId};
pub use llm::{
    ChatMessage, ChatRole, CompletionRequest, CompletionResponse, StopReason, TokenUsage,
    ToolCall, ToolSpec,
};
pub use safety::{SafetyLevel, SafetyOverrides};

//! Error taxonomy shared across all Vigil crates.
//!
//! These are the cross-cutting failures that propagate to the caller of a
//! request. Failures internal to a single tool call are *not* errors at
//! this level: they are returned in-band as tool results so the model can
//! adapt (see `vigil-tools`).

/// Errors that cross subsystem boundaries and surface to the request caller.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Every configured provider endpoint is disabled or circuit-open.
    #[error("no LLM provider is currently available")]
    ProviderUnavailable,

    /// The request ran past its deadline.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The worker pool and its queue are full.
    #[error("server is at capacity, try again later")]
    ResourceExhausted,

    /// The session already has a turn in flight.
    #[error("session '{0}' already has a turn in flight")]
    SessionBusy(String),

    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// An internal invariant was violated. The message is safe to log but
    /// is never shown verbatim to end users.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Short machine-readable kind, used as the `error.kind` span attribute.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::ProviderUnavailable => "provider_unavailable",
            GatewayError::DeadlineExceeded => "deadline_exceeded",
            GatewayError::ResourceExhausted => "resource_exhausted",
            GatewayError::SessionBusy(_) => "session_busy",
            GatewayError::Config(_) => "config",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// Message suitable for end users: no internals, no credentials.
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Internal(_) => {
                "an internal error occurred while handling the request".to_string()
            }
            other => other.to_string(),
        }
    }
}

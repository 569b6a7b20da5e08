//! LLM provider routing with failover.
//!
//! Each configured endpoint carries health counters, an exponential-backoff
//! circuit breaker, and a token-bucket rate limiter. The router ranks the
//! currently-selectable endpoints and walks them in order until one
//! completes the request. The HTTP transport sits behind the
//! [`CompletionBackend`] trait so tests can script responses.

pub mod backend;
pub mod endpoint;
pub mod router;

pub use backend::{CompletionBackend, HttpBackend, ProviderError};
pub use endpoint::{EndpointHealth, EndpointState};
pub use router::ProviderRouter;

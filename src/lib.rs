//! Vigil: an autonomous LLM agent gateway.
//!
//! This facade crate re-exports the workspace subsystems so integration
//! tests and embedders can depend on a single crate.

pub use vigil_agent as agent;
pub use vigil_approval as approval;
pub use vigil_provider as provider;
pub use vigil_tools as tools;
pub use vigil_trace as trace;
pub use vigil_types as types;

//! Tool execution for the Vigil agent gateway.
//!
//! A [`Tool`] is a named handler with a JSON schema; the [`ToolRegistry`]
//! stores them; the [`ToolExecutor`] wraps every call in the sandbox
//! pipeline (path policy, timeout, span recording) and always returns an
//! in-band [`ToolResult`] -- failures never cross the executor boundary as
//! errors, so the model can read them and adapt.

pub mod builtin;
pub mod definition;
pub mod executor;
pub mod policy;
pub mod registry;

pub use builtin::register_builtin_tools;
pub use definition::{Tool, ToolError, ToolErrorKind, ToolResult};
pub use executor::{ExecutorConfig, ToolExecutor};
pub use policy::{PathPolicy, ShellGuard};
pub use registry::ToolRegistry;

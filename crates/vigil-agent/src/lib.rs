//! The agentic execution pipeline.
//!
//! [`Brain`] runs one conversational turn: model call, gated tool
//! dispatch, result threading, repeat until a text answer.
//! [`SwarmOrchestrator`] runs the bounded coder/reviewer/critic loop on
//! top of role-specialized brains. [`SelfHealingExecutor`] retries failed
//! code with error context. [`Gateway`] is the per-process front: session
//! management, worker pool, deadlines.

pub mod brain;
pub mod cancel;
pub mod gateway;
pub mod heal;
pub mod profiles;
pub mod session;
pub mod swarm;

pub use brain::{Brain, SkillDispatch};
pub use cancel::{cancel_pair, CancelHandle, CancelSignal};
pub use gateway::{Gateway, RequestMode};
pub use heal::{classify_error, ErrorCategory, HealOutcome, SelfHealingExecutor};
pub use profiles::{builtin_profile, AgentProfile, AgentRole, SandboxAccess};
pub use session::{Session, SessionStore, TurnGuard, MAX_SESSION_MESSAGES};
pub use swarm::{SwarmOrchestrator, SwarmResult, SwarmStatus};

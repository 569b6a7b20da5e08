//! Human-in-the-loop approval for tool invocations.
//!
//! Tool calls are classified by safety level; sensitive and critical calls
//! block on a pending request until a user approves, denies, or the
//! request times out. Approved calls can carry a temporary trust grant,
//! optionally scoped to a path prefix, so repeated operations inside an
//! approved area stop prompting.

pub mod broker;
pub mod trust;

pub use broker::{ApprovalBroker, ApprovalOutcome, ApprovalRequest, ApprovalState, Decision};
pub use trust::{TrustGrant, TrustStore};

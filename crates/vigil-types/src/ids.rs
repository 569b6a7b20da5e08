//! Strongly-typed identifier wrappers to prevent accidental misuse of strings.
//!
//! Each id wraps an `Arc<str>` so cloning is an atomic increment instead of
//! a heap allocation. Generated ids carry a human-readable prefix
//! (`trace_`, `span_`, ...) followed by a slice of a v4 UUID, which keeps
//! them greppable in logs and trace files.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! typed_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal, $hex_len:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Wrap an existing id string.
            pub fn new(id: impl Into<Arc<str>>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh id with the type's prefix.
            pub fn generate() -> Self {
                let hex = uuid::Uuid::new_v4().simple().to_string();
                Self(format!("{}{}", $prefix, &hex[..$hex_len]).into())
            }

            /// Borrow as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self::new(s)
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.as_str() == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.as_str() == *other
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::new(s))
            }
        }
    };
}

typed_id!(
    /// Identifies one complete request trace.
    TraceId,
    "trace_",
    16
);

typed_id!(
    /// Identifies one span within a trace.
    SpanId,
    "span_",
    12
);

typed_id!(
    /// Identifies a pending or resolved approval request.
    ApprovalId,
    "approval_",
    8
);

typed_id!(
    /// Identifies a chat session.
    SessionId,
    "sess_",
    12
);

typed_id!(
    /// Identifies one swarm run.
    SwarmId,
    "swarm_",
    8
);

//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            /// Create a new id from a string.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a new random id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Get the inner string reference.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Unique identifier for an Agent in the catalog.
    AgentId
);

string_id!(
    /// Unique identifier for a Task.
    TaskId
);

string_id!(
    /// Unique identifier for a BatchJob.
    JobId
);

string_id!(
    /// Unique identifier for an ErrorRecord in the ledger.
    RecordId
);

string_id!(
    /// Unique identifier for a TraceSpan.
    SpanId
);

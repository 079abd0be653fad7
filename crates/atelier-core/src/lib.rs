//! Atelier Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Database
//! - Runtime specifics
//!
//! All types here represent the core business domain of the agent
//! orchestration layer: agent descriptors, task requests, routing
//! decisions, batch jobs, error records, and trace spans.

pub mod agent;
pub mod batch;
pub mod error;
pub mod ids;
pub mod record;
pub mod status;
pub mod task;
pub mod trace;

// Re-export commonly used types
pub use agent::AgentDescriptor;
pub use batch::BatchJob;
pub use error::{ErrorKind, OrchestratorError};
pub use ids::{AgentId, JobId, RecordId, SpanId, TaskId};
pub use record::ErrorRecord;
pub use status::{AgentKind, AgentStatus, BatchStatus};
pub use task::{RoutingDecision, TaskOutcome, TaskRequest};
pub use trace::TraceSpan;

//! The shared exception taxonomy.
//!
//! Every component classifies failures with [`ErrorKind`]; the transience
//! of a kind decides whether the router retries. Each error variant carries
//! the ids and field names needed to reconstruct the failing condition
//! without re-reading logs.

use crate::ids::{AgentId, TaskId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the orchestration core.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrchestratorError {
    /// A declarative definition or request failed validation. For catalog
    /// loads the subject is the offending agent id and the catalog is not
    /// applied; for task submissions it is the task id.
    #[error("validation failed for '{subject}': field '{field}': {reason}")]
    ConfigValidation {
        subject: String,
        field: &'static str,
        reason: String,
    },

    /// No routable agent covers the required capabilities.
    #[error("no agent covers capabilities [{}]", required_capabilities.join(", "))]
    AgentNotFound { required_capabilities: Vec<String> },

    /// The selected agent stayed at capacity past the bounded slot wait.
    #[error("agent '{agent_id}' unavailable after waiting {waited_ms}ms for a slot")]
    AgentUnavailable { agent_id: AgentId, waited_ms: u64 },

    /// The same task id was submitted while still in flight.
    #[error("task '{task_id}' is already in flight")]
    DuplicateTask { task_id: TaskId },

    /// Reserved for future non-deterministic-tie detection.
    #[error("routing for task '{task_id}' was ambiguous")]
    RoutingAmbiguity { task_id: TaskId },

    /// A dispatch exceeded its deadline.
    #[error("task '{task_id}' timed out after {timeout_ms}ms")]
    Timeout { task_id: TaskId, timeout_ms: u64 },

    /// The ledger's backing store failed terminally. Logged, never raised
    /// back through the router.
    #[error("ledger persistence failed: {reason}")]
    Persistence { reason: String },

    /// The task was cancelled before or during dispatch.
    #[error("task '{task_id}' was cancelled")]
    Cancelled { task_id: TaskId },

    /// The agent proxy reported an execution failure.
    #[error("agent '{agent_id}' execution failed: {message}")]
    AgentExecution {
        agent_id: AgentId,
        message: String,
        transient: bool,
    },
}

impl OrchestratorError {
    /// Classify this error into the closed kind vocabulary.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigValidation { .. } => ErrorKind::ConfigValidation,
            Self::AgentNotFound { .. } => ErrorKind::AgentNotFound,
            Self::AgentUnavailable { .. } => ErrorKind::AgentUnavailable,
            Self::DuplicateTask { .. } => ErrorKind::DuplicateTask,
            Self::RoutingAmbiguity { .. } => ErrorKind::RoutingAmbiguity,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Persistence { .. } => ErrorKind::Persistence,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::AgentExecution { .. } => ErrorKind::AgentExecution,
        }
    }

    /// Whether the router may retry after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AgentExecution { transient, .. } => *transient,
            other => other.kind().is_transient(),
        }
    }
}

/// Discriminant for [`OrchestratorError`], stored on ledger records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigValidation,
    AgentNotFound,
    AgentUnavailable,
    DuplicateTask,
    RoutingAmbiguity,
    Timeout,
    Persistence,
    Cancelled,
    AgentExecution,
}

impl ErrorKind {
    /// Transient kinds are eligible for bounded retry; everything else is
    /// permanent and surfaces to the caller on first occurrence.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::AgentUnavailable | Self::Timeout)
    }

    /// Stable label used in trace attributes and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigValidation => "config_validation",
            Self::AgentNotFound => "agent_not_found",
            Self::AgentUnavailable => "agent_unavailable",
            Self::DuplicateTask => "duplicate_task",
            Self::RoutingAmbiguity => "routing_ambiguity",
            Self::Timeout => "timeout",
            Self::Persistence => "persistence",
            Self::Cancelled => "cancelled",
            Self::AgentExecution => "agent_execution",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transience_classification() {
        assert!(ErrorKind::Timeout.is_transient());
        assert!(ErrorKind::AgentUnavailable.is_transient());
        assert!(!ErrorKind::AgentNotFound.is_transient());
        assert!(!ErrorKind::ConfigValidation.is_transient());
        assert!(!ErrorKind::DuplicateTask.is_transient());
        assert!(!ErrorKind::Cancelled.is_transient());
    }

    #[test]
    fn test_execution_error_carries_its_own_transience() {
        let err = OrchestratorError::AgentExecution {
            agent_id: AgentId::new("a1"),
            message: "rate limited".into(),
            transient: true,
        };
        assert!(err.is_transient());
        assert_eq!(err.kind(), ErrorKind::AgentExecution);

        let err = OrchestratorError::AgentExecution {
            agent_id: AgentId::new("a1"),
            message: "bad payload".into(),
            transient: false,
        };
        assert!(!err.is_transient());
    }
}

//! Error records stored in the ledger.

use crate::error::{ErrorKind, OrchestratorError};
use crate::ids::{RecordId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One classified failure, as persisted by the error ledger.
///
/// Append-only: never mutated or deleted by the core. Retention and
/// rotation are an external concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Unique record identifier.
    pub id: RecordId,

    /// Task this failure belongs to; `None` for system-level errors.
    pub task_id: Option<TaskId>,

    /// Classified failure kind.
    pub kind: ErrorKind,

    /// Human-readable message.
    pub message: String,

    /// When the failure occurred.
    pub occurred_at: DateTime<Utc>,

    /// Structured context (agent_id, retry_count, job_id, ...).
    pub context: HashMap<String, String>,
}

impl ErrorRecord {
    /// Create a record for a task-level failure.
    pub fn for_task(task_id: TaskId, error: &OrchestratorError) -> Self {
        Self {
            id: RecordId::generate(),
            task_id: Some(task_id),
            kind: error.kind(),
            message: error.to_string(),
            occurred_at: Utc::now(),
            context: HashMap::new(),
        }
    }

    /// Create a record for a system-level failure with no task attached.
    pub fn system(error: &OrchestratorError) -> Self {
        Self {
            id: RecordId::generate(),
            task_id: None,
            kind: error.kind(),
            message: error.to_string(),
            occurred_at: Utc::now(),
            context: HashMap::new(),
        }
    }

    /// Builder method to add a context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Key used for write-time deduplication: the same logical error
    /// recorded again from a retry loop collapses into one record.
    pub fn dedup_key(&self) -> (Option<TaskId>, ErrorKind, DateTime<Utc>) {
        (self.task_id.clone(), self.kind, self.occurred_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::AgentId;

    #[test]
    fn test_record_from_error() {
        let task_id = TaskId::generate();
        let err = OrchestratorError::Timeout {
            task_id: task_id.clone(),
            timeout_ms: 5000,
        };
        let record = ErrorRecord::for_task(task_id.clone(), &err)
            .with_context("agent_id", "a1")
            .with_context("retry_count", "3");

        assert_eq!(record.task_id, Some(task_id));
        assert_eq!(record.kind, ErrorKind::Timeout);
        assert_eq!(record.context.get("agent_id"), Some(&"a1".to_string()));
    }

    #[test]
    fn test_dedup_key_ignores_record_id() {
        let task_id = TaskId::generate();
        let err = OrchestratorError::AgentUnavailable {
            agent_id: AgentId::new("a1"),
            waited_ms: 100,
        };
        let a = ErrorRecord::for_task(task_id.clone(), &err);
        let mut b = a.clone();
        b.id = RecordId::generate();
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}

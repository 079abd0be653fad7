//! Task request and routing decision types.

use crate::ids::{AgentId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Default task priority on a 0-100 scale.
pub const DEFAULT_PRIORITY: u8 = 50;

/// A request to execute one unit of work on some agent.
///
/// Immutable once submitted; the payload is opaque to the core and is
/// handed to the selected agent proxy verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Unique task identifier (caller-supplied or generated).
    pub id: TaskId,

    /// Capability tags the selected agent must cover. Never empty.
    pub required_capabilities: BTreeSet<String>,

    /// Opaque payload as a JSON string.
    pub payload: String,

    /// Priority, 0-100.
    pub priority: u8,

    /// Execution deadline in milliseconds; the router default applies
    /// when unset.
    pub timeout_ms: Option<u64>,

    /// When the task was submitted.
    pub submitted_at: DateTime<Utc>,
}

impl TaskRequest {
    /// Create a new task with a generated id.
    pub fn new(
        required_capabilities: impl IntoIterator<Item = impl Into<String>>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: TaskId::generate(),
            required_capabilities: required_capabilities
                .into_iter()
                .map(Into::into)
                .collect(),
            payload: payload.into(),
            priority: DEFAULT_PRIORITY,
            timeout_ms: None,
            submitted_at: Utc::now(),
        }
    }

    /// Builder method to set a specific id (callers that track their own ids).
    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }

    /// Builder method to set the priority.
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to set a caller-specific execution deadline.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// The outcome of selecting an agent for one task attempt.
///
/// A retried task produces a new decision per attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Task this decision belongs to.
    pub task_id: TaskId,

    /// Selected agent.
    pub agent_id: AgentId,

    /// Composite match score in [0.0, 1.0].
    pub match_score: f64,

    /// When the decision was made.
    pub decided_at: DateTime<Utc>,
}

impl RoutingDecision {
    /// Create a new decision, clamping the score into [0.0, 1.0].
    pub fn new(task_id: TaskId, agent_id: AgentId, match_score: f64) -> Self {
        Self {
            task_id,
            agent_id,
            match_score: match_score.clamp(0.0, 1.0),
            decided_at: Utc::now(),
        }
    }
}

/// Result returned to the caller for a successfully executed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// The decision that led to this execution.
    pub decision: RoutingDecision,

    /// Agent result payload, opaque to the core.
    pub output: String,

    /// Number of retries that were needed before success.
    pub retries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_clamps_score() {
        let d = RoutingDecision::new(TaskId::generate(), AgentId::new("a1"), 1.7);
        assert_eq!(d.match_score, 1.0);
        let d = RoutingDecision::new(TaskId::generate(), AgentId::new("a1"), -0.2);
        assert_eq!(d.match_score, 0.0);
    }

    #[test]
    fn test_task_defaults() {
        let task = TaskRequest::new(["copy"], "{}");
        assert_eq!(task.priority, DEFAULT_PRIORITY);
        assert!(task.required_capabilities.contains("copy"));
    }
}

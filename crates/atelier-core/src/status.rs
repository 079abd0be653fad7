//! Status enums for Agents and BatchJobs.

use serde::{Deserialize, Serialize};

/// Breadth class of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentKind {
    /// Broad-capability agent, the default choice absent a more specific match.
    Super,
    /// Narrow-capability agent, preferred when its capabilities exactly match a task.
    Specialized,
}

/// Status of an Agent in the catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    /// Agent is executing at least one task.
    Active,
    /// Agent is reachable and has no work in flight.
    #[default]
    Idle,
    /// Agent is not reachable; never a routing candidate.
    Offline,
}

impl AgentStatus {
    /// Returns true if the agent can be considered for routing.
    pub fn is_routable(&self) -> bool {
        !matches!(self, Self::Offline)
    }
}

/// Status of a BatchJob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    /// Job created but fan-out has not started.
    #[default]
    Pending,
    /// Items are being dispatched.
    Running,
    /// Fan-out finished and at least one item succeeded.
    Completed,
    /// Every item ultimately failed.
    Failed,
}

impl BatchStatus {
    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

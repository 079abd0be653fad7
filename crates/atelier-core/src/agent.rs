//! Agent descriptor types.

use crate::ids::AgentId;
use crate::status::{AgentKind, AgentStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Describes one agent known to the orchestration core.
///
/// Created by the catalog loader; `status`, `run_count` and `last_run_at`
/// are mutated only through the router's dispatch/complete paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    /// Unique, stable agent identifier.
    pub id: AgentId,

    /// Human-readable name.
    pub display_name: String,

    /// Breadth class (Super or Specialized).
    pub kind: AgentKind,

    /// Capability tags this agent can serve.
    pub capabilities: BTreeSet<String>,

    /// Maximum number of concurrent executions (>= 1).
    pub max_concurrency: u32,

    /// Current status.
    pub status: AgentStatus,

    /// Total number of dispatches to this agent.
    pub run_count: u64,

    /// When this agent last finished a successful execution.
    pub last_run_at: Option<DateTime<Utc>>,
}

impl AgentDescriptor {
    /// Create a new descriptor with minimal required fields.
    pub fn new(id: impl Into<AgentId>, kind: AgentKind) -> Self {
        Self {
            id: id.into(),
            display_name: String::new(),
            kind,
            capabilities: BTreeSet::new(),
            max_concurrency: 1,
            status: AgentStatus::Idle,
            run_count: 0,
            last_run_at: None,
        }
    }

    /// Builder method to set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Builder method to add a capability tag.
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// Builder method to set the concurrency limit.
    pub fn with_max_concurrency(mut self, limit: u32) -> Self {
        self.max_concurrency = limit;
        self
    }

    /// Builder method to set the status.
    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    /// Check whether this agent covers every required capability.
    pub fn covers(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_covers_requires_superset() {
        let agent = AgentDescriptor::new("a1", AgentKind::Specialized)
            .with_capability("copy")
            .with_capability("seo");

        let mut required = BTreeSet::new();
        required.insert("copy".to_string());
        assert!(agent.covers(&required));

        required.insert("3d_model".to_string());
        assert!(!agent.covers(&required));
    }

    #[test]
    fn test_builder_defaults() {
        let agent = AgentDescriptor::new("a1", AgentKind::Super);
        assert_eq!(agent.max_concurrency, 1);
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.run_count, 0);
        assert!(agent.last_run_at.is_none());
    }
}

//! Trace spans for observability.

use crate::ids::SpanId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A timed, attributed record of one execution.
///
/// Used for observability only; spans never affect routing decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSpan {
    /// Unique span identifier.
    pub span_id: SpanId,

    /// Enclosing span, if any (batch items nest under their job span).
    pub parent_span_id: Option<SpanId>,

    /// Operation name, e.g. "route_task".
    pub name: String,

    /// When the span was opened.
    pub started_at: DateTime<Utc>,

    /// When the span was closed; `None` while open.
    pub ended_at: Option<DateTime<Utc>>,

    /// Attributes (agent_id, task_id, match_score, outcome, ...).
    pub attributes: HashMap<String, String>,
}

impl TraceSpan {
    /// Open a new root span.
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            span_id: SpanId::generate(),
            parent_span_id: None,
            name: name.into(),
            started_at: Utc::now(),
            ended_at: None,
            attributes: HashMap::new(),
        }
    }

    /// Open a child of an existing span.
    pub fn child_of(parent: &SpanId, name: impl Into<String>) -> Self {
        let mut span = Self::start(name);
        span.parent_span_id = Some(parent.clone());
        span
    }

    /// Set an attribute on the span.
    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    /// Close the span.
    pub fn end(&mut self) {
        self.ended_at = Some(Utc::now());
    }

    /// Span duration in milliseconds, if closed.
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_lifecycle() {
        let mut span = TraceSpan::start("route_task");
        assert!(span.ended_at.is_none());
        assert!(span.duration_ms().is_none());

        span.set_attribute("agent_id", "a1");
        span.end();
        assert!(span.ended_at.is_some());
        assert!(span.duration_ms().unwrap() >= 0);
    }

    #[test]
    fn test_child_span_links_parent() {
        let root = TraceSpan::start("batch_job");
        let child = TraceSpan::child_of(&root.span_id, "route_task");
        assert_eq!(child.parent_span_id, Some(root.span_id));
    }
}

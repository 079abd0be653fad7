//! The agent proxy seam.
//!
//! Each of the external agents implements [`AgentProxy`]; the router
//! depends only on this contract, never on an agent's internals.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use atelier_core::{AgentId, TaskId};

/// Failure reported by an agent proxy.
///
/// The proxy decides transience: rate limits and flaky upstreams are
/// transient, payload rejections are not.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct ProxyError {
    /// Human-readable failure description.
    pub message: String,

    /// Whether the router may retry this failure.
    pub transient: bool,
}

impl ProxyError {
    /// A retryable failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    /// A permanent failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

/// Uniform execution interface implemented by every external agent.
///
/// `execute` must be idempotent-safe: the router may call it again for the
/// same task after a transient failure.
#[async_trait]
pub trait AgentProxy: Send + Sync {
    /// Execute the opaque payload within the given deadline.
    async fn execute(
        &self,
        task_id: &TaskId,
        payload: &str,
        deadline: Duration,
    ) -> Result<String, ProxyError>;

    /// Best-effort cancellation signal for an already-dispatched task.
    /// The default implementation ignores it.
    async fn cancel(&self, _task_id: &TaskId) {}
}

/// Registry mapping agent ids to their proxies.
#[derive(Default)]
pub struct ProxyRegistry {
    proxies: RwLock<HashMap<AgentId, Arc<dyn AgentProxy>>>,
}

impl ProxyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the proxy for an agent.
    pub fn register(&self, agent_id: AgentId, proxy: Arc<dyn AgentProxy>) {
        let mut proxies = self.proxies.write().unwrap_or_else(|e| e.into_inner());
        proxies.insert(agent_id, proxy);
    }

    /// Remove the proxy for an agent.
    pub fn deregister(&self, agent_id: &AgentId) {
        let mut proxies = self.proxies.write().unwrap_or_else(|e| e.into_inner());
        proxies.remove(agent_id);
    }

    /// Look up the proxy for an agent.
    pub fn get(&self, agent_id: &AgentId) -> Option<Arc<dyn AgentProxy>> {
        let proxies = self.proxies.read().unwrap_or_else(|e| e.into_inner());
        proxies.get(agent_id).cloned()
    }
}

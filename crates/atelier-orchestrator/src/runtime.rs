//! Per-agent runtime state.
//!
//! One record per agent, each with its own concurrency semaphore and
//! atomic counters, so unrelated agents never contend on a shared lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use atelier_core::{AgentDescriptor, AgentId, AgentStatus};

use crate::catalog::Catalog;

/// Live state for one agent.
///
/// A record survives catalog reconfiguration: the run counters are
/// monotonic for the life of the agent, so a limit change resizes the
/// semaphore in place instead of replacing the record.
pub(crate) struct AgentRuntime {
    /// Concurrency slots; permits equal the descriptor's limit.
    pub semaphore: Arc<Semaphore>,

    /// Concurrency limit the semaphore currently targets.
    max_concurrency: AtomicU32,

    /// Permits still owed to a shrink while they were held by executions.
    pending_shrink: AtomicU32,

    /// Tasks currently executing on this agent.
    in_flight: AtomicU32,

    /// Total dispatches to this agent.
    run_count: AtomicU64,

    /// Last successful completion.
    last_run_at: Mutex<Option<DateTime<Utc>>>,
}

impl AgentRuntime {
    fn new(max_concurrency: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency as usize)),
            max_concurrency: AtomicU32::new(max_concurrency),
            pending_shrink: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            run_count: AtomicU64::new(0),
            last_run_at: Mutex::new(None),
        }
    }

    pub fn max_concurrency(&self) -> u32 {
        self.max_concurrency.load(Ordering::SeqCst)
    }

    /// Move the permit count to a new limit without touching counters.
    /// Growth is immediate; a shrink forgets whatever permits are free now
    /// and settles the remainder on later syncs as executions hand theirs
    /// back.
    fn resize(&self, new_limit: u32) {
        let old_limit = self.max_concurrency.swap(new_limit, Ordering::SeqCst);
        if new_limit > old_limit {
            let grow = new_limit - old_limit;
            let reclaimed = grow.min(self.pending_shrink.load(Ordering::SeqCst));
            self.pending_shrink.fetch_sub(reclaimed, Ordering::SeqCst);
            self.semaphore.add_permits((grow - reclaimed) as usize);
        } else if new_limit < old_limit {
            self.pending_shrink
                .fetch_add(old_limit - new_limit, Ordering::SeqCst);
        }
        self.settle_shrink();
    }

    fn settle_shrink(&self) {
        let pending = self.pending_shrink.load(Ordering::SeqCst);
        if pending > 0 {
            let forgotten = self.semaphore.forget_permits(pending as usize) as u32;
            self.pending_shrink.fetch_sub(forgotten, Ordering::SeqCst);
        }
    }

    pub fn in_flight(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn run_count(&self) -> u64 {
        self.run_count.load(Ordering::SeqCst)
    }

    pub fn last_run_at(&self) -> Option<DateTime<Utc>> {
        *self.last_run_at.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a dispatch: one more task in flight, one more run.
    pub fn begin(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        self.run_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Record the end of an execution.
    pub fn finish(&self, success: bool) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if success {
            let mut last = self.last_run_at.lock().unwrap_or_else(|e| e.into_inner());
            *last = Some(Utc::now());
        }
    }

    /// Live status derived from the in-flight count.
    pub fn status(&self) -> AgentStatus {
        if self.in_flight() > 0 {
            AgentStatus::Active
        } else {
            AgentStatus::Idle
        }
    }
}

/// Registry of per-agent runtime records, kept in sync with the catalog.
#[derive(Default)]
pub(crate) struct RuntimeRegistry {
    agents: RwLock<HashMap<AgentId, Arc<AgentRuntime>>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile runtime records with a catalog snapshot: create records
    /// for new agents, resize records whose limit changed, and drop agents
    /// that left the configuration and have nothing in flight.
    pub fn sync(&self, catalog: &Catalog) {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());

        for descriptor in catalog.agents() {
            match agents.get(&descriptor.id) {
                Some(runtime) => {
                    if runtime.max_concurrency() != descriptor.max_concurrency {
                        runtime.resize(descriptor.max_concurrency);
                    } else {
                        runtime.settle_shrink();
                    }
                }
                None => {
                    agents.insert(
                        descriptor.id.clone(),
                        Arc::new(AgentRuntime::new(descriptor.max_concurrency)),
                    );
                }
            }
        }

        agents.retain(|id, runtime| catalog.get(id).is_some() || runtime.in_flight() > 0);
    }

    pub fn get(&self, id: &AgentId) -> Option<Arc<AgentRuntime>> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents.get(id).cloned()
    }

    /// In-flight count for scoring; zero for agents not yet seen.
    pub fn in_flight(&self, id: &AgentId) -> u32 {
        self.get(id).map(|r| r.in_flight()).unwrap_or(0)
    }

    /// Merge live counters into a catalog descriptor for status queries.
    pub fn describe(&self, descriptor: &AgentDescriptor) -> AgentDescriptor {
        let mut merged = descriptor.clone();
        if let Some(runtime) = self.get(&descriptor.id) {
            merged.run_count = runtime.run_count();
            merged.last_run_at = runtime.last_run_at();
            if merged.status.is_routable() {
                merged.status = runtime.status();
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AgentDefinition, Revision};
    use atelier_core::AgentKind;

    fn catalog(defs: Vec<AgentDefinition>) -> Catalog {
        Catalog::build(defs, Revision::new("1")).unwrap()
    }

    fn definition(id: &str, max_concurrency: u32) -> AgentDefinition {
        AgentDefinition {
            id: id.into(),
            display_name: String::new(),
            kind: AgentKind::Super,
            capabilities: vec!["copy".into()],
            max_concurrency,
            status: AgentStatus::Idle,
        }
    }

    #[test]
    fn test_sync_creates_and_prunes() {
        let registry = RuntimeRegistry::new();
        registry.sync(&catalog(vec![definition("a1", 2)]));
        assert!(registry.get(&AgentId::new("a1")).is_some());

        registry.sync(&catalog(vec![definition("a2", 1)]));
        assert!(registry.get(&AgentId::new("a1")).is_none());
        assert!(registry.get(&AgentId::new("a2")).is_some());
    }

    #[test]
    fn test_busy_agent_survives_removal() {
        let registry = RuntimeRegistry::new();
        registry.sync(&catalog(vec![definition("a1", 2)]));

        let runtime = registry.get(&AgentId::new("a1")).unwrap();
        runtime.begin();

        registry.sync(&catalog(vec![definition("a2", 1)]));
        assert!(registry.get(&AgentId::new("a1")).is_some());

        runtime.finish(true);
        registry.sync(&catalog(vec![definition("a2", 1)]));
        assert!(registry.get(&AgentId::new("a1")).is_none());
    }

    #[test]
    fn test_limit_change_preserves_counters() {
        let registry = RuntimeRegistry::new();
        registry.sync(&catalog(vec![definition("a1", 1)]));

        let runtime = registry.get(&AgentId::new("a1")).unwrap();
        runtime.begin();
        runtime.finish(true);
        assert_eq!(runtime.run_count(), 1);

        registry.sync(&catalog(vec![definition("a1", 2)]));
        let same = registry.get(&AgentId::new("a1")).unwrap();
        assert!(Arc::ptr_eq(&runtime, &same));
        assert_eq!(same.run_count(), 1);
        assert!(same.last_run_at().is_some());
        assert_eq!(same.max_concurrency(), 2);
        assert_eq!(same.semaphore.available_permits(), 2);
    }

    #[test]
    fn test_shrink_settles_as_permits_return() {
        let registry = RuntimeRegistry::new();
        registry.sync(&catalog(vec![definition("a1", 2)]));
        let runtime = registry.get(&AgentId::new("a1")).unwrap();

        // Both slots held while the limit drops to 1.
        let p1 = runtime.semaphore.clone().try_acquire_owned().unwrap();
        let p2 = runtime.semaphore.clone().try_acquire_owned().unwrap();
        registry.sync(&catalog(vec![definition("a1", 1)]));
        assert_eq!(runtime.max_concurrency(), 1);
        assert_eq!(runtime.semaphore.available_permits(), 0);

        // The first returned permit is absorbed by the owed shrink.
        drop(p1);
        registry.sync(&catalog(vec![definition("a1", 1)]));
        assert_eq!(runtime.semaphore.available_permits(), 0);

        drop(p2);
        registry.sync(&catalog(vec![definition("a1", 1)]));
        assert_eq!(runtime.semaphore.available_permits(), 1);
    }

    #[test]
    fn test_grow_cancels_owed_shrink() {
        let registry = RuntimeRegistry::new();
        registry.sync(&catalog(vec![definition("a1", 2)]));
        let runtime = registry.get(&AgentId::new("a1")).unwrap();

        let _p1 = runtime.semaphore.clone().try_acquire_owned().unwrap();
        let _p2 = runtime.semaphore.clone().try_acquire_owned().unwrap();
        registry.sync(&catalog(vec![definition("a1", 1)]));

        // Growing back reclaims the owed permit instead of minting a third.
        registry.sync(&catalog(vec![definition("a1", 2)]));
        assert_eq!(runtime.max_concurrency(), 2);
        assert_eq!(runtime.semaphore.available_permits(), 0);
        drop(_p1);
        drop(_p2);
        assert_eq!(runtime.semaphore.available_permits(), 2);
    }

    #[test]
    fn test_counters_and_status() {
        let runtime = AgentRuntime::new(2);
        assert_eq!(runtime.status(), AgentStatus::Idle);

        runtime.begin();
        assert_eq!(runtime.status(), AgentStatus::Active);
        assert_eq!(runtime.in_flight(), 1);
        assert_eq!(runtime.run_count(), 1);

        runtime.finish(true);
        assert_eq!(runtime.status(), AgentStatus::Idle);
        assert!(runtime.last_run_at().is_some());
    }
}

//! Shared test doubles and fixtures for router and batch tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use atelier_core::{AgentId, AgentKind, AgentStatus, TaskId};

use crate::config::{LedgerConfig, RouterConfig, TracerConfig};
use crate::ledger::{ErrorFilter, ErrorLedger, MemoryLedgerStore};
use crate::loader::CatalogLoader;
use crate::proxy::{AgentProxy, ProxyError, ProxyRegistry};
use crate::router::Router;
use crate::source::{AgentDefinition, InMemoryCatalogSource};
use crate::tracer::{LoggingSink, Tracer};

/// Proxy driven by a script of canned results.
///
/// Each `execute` call pops the next scripted result; an exhausted script
/// succeeds with a fixed payload. Tracks peak concurrency and cancelled
/// task ids for assertions.
pub(crate) struct ScriptedProxy {
    delay: Duration,
    script: Mutex<VecDeque<Result<String, ProxyError>>>,
    active: AtomicU32,
    max_active: AtomicU32,
    executed: AtomicU32,
    cancelled: Mutex<Vec<TaskId>>,
}

impl ScriptedProxy {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::from_millis(0))
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            script: Mutex::new(VecDeque::new()),
            active: AtomicU32::new(0),
            max_active: AtomicU32::new(0),
            executed: AtomicU32::new(0),
            cancelled: Mutex::new(Vec::new()),
        })
    }

    /// Queue the result for the next unscripted call.
    pub fn push(&self, result: Result<String, ProxyError>) {
        self.script.lock().unwrap().push_back(result);
    }

    /// Total completed `execute` calls.
    pub fn executed(&self) -> u32 {
        self.executed.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `execute` calls observed.
    pub fn max_active(&self) -> u32 {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Task ids that received a cancellation signal.
    pub fn cancelled(&self) -> Vec<TaskId> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentProxy for ScriptedProxy {
    async fn execute(
        &self,
        _task_id: &TaskId,
        payload: &str,
        _deadline: Duration,
    ) -> Result<String, ProxyError> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let result = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("done:{payload}")));

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.executed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn cancel(&self, task_id: &TaskId) {
        self.cancelled.lock().unwrap().push(task_id.clone());
    }
}

/// Catalog definition fixture.
pub(crate) fn definition(id: &str, capabilities: &[&str]) -> AgentDefinition {
    AgentDefinition {
        id: id.into(),
        display_name: format!("Agent {id}"),
        kind: AgentKind::Specialized,
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        max_concurrency: 1,
        status: AgentStatus::Idle,
    }
}

pub(crate) fn super_definition(id: &str, capabilities: &[&str]) -> AgentDefinition {
    let mut def = definition(id, capabilities);
    def.kind = AgentKind::Super;
    def
}

/// Everything a router test needs, wired over in-memory stores.
pub(crate) struct Harness {
    pub router: Arc<Router>,
    pub source: Arc<InMemoryCatalogSource>,
    pub proxies: Arc<ProxyRegistry>,
    pub ledger: Arc<ErrorLedger>,
    pub tracer: Arc<Tracer>,
}

impl Harness {
    pub fn register(&self, id: &str, proxy: Arc<ScriptedProxy>) {
        self.proxies.register(AgentId::new(id), proxy);
    }

    /// Ledger records matching the filter, after a flush.
    pub async fn errors(&self, filter: &ErrorFilter) -> Vec<atelier_core::ErrorRecord> {
        self.ledger.flush().await;
        self.ledger.query(filter).unwrap()
    }
}

/// Build a router over the given definitions with all-default config.
/// Must run inside a tokio runtime.
pub(crate) fn harness(definitions: Vec<AgentDefinition>) -> Harness {
    harness_with_config(definitions, RouterConfig::default())
}

/// Build a router with test-tuned config. Must run inside a tokio runtime.
pub(crate) fn harness_with_config(
    definitions: Vec<AgentDefinition>,
    config: RouterConfig,
) -> Harness {
    // RUST_LOG=debug makes failing router tests narrate themselves.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let source = Arc::new(InMemoryCatalogSource::new(definitions));
    let loader = Arc::new(CatalogLoader::new(source.clone()));
    let proxies = Arc::new(ProxyRegistry::new());
    let ledger = Arc::new(ErrorLedger::new(
        Arc::new(MemoryLedgerStore::new()),
        LedgerConfig::default(),
    ));
    let tracer = Arc::new(Tracer::new(Arc::new(LoggingSink), TracerConfig::default()));

    let router = Router::new(
        loader,
        proxies.clone(),
        ledger.clone(),
        tracer.clone(),
        config,
    );
    Harness {
        router,
        source,
        proxies,
        ledger,
        tracer,
    }
}

/// Router config with short waits so failure-path tests stay fast.
pub(crate) fn fast_config() -> RouterConfig {
    RouterConfig {
        max_retries: 3,
        backoff_base: Duration::from_millis(1),
        backoff_cap: Duration::from_millis(5),
        slot_wait: Duration::from_millis(50),
        default_timeout: Duration::from_millis(200),
        ..RouterConfig::default()
    }
}

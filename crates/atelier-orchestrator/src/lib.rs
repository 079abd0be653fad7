//! Atelier Orchestrator
//!
//! Runtime half of the agent orchestration core. Turns a declarative agent
//! catalog into routing decisions and drives task execution:
//!
//! - [`loader`]: validated, cached catalog with revision-based invalidation.
//! - [`router`]: capability scoring, concurrency slots, retries, batch
//!   fan-out, duplicate and cancellation handling.
//! - [`ledger`]: append-only, queryable record of every failure.
//! - [`tracer`]: best-effort span/counter emission plus internal metrics.
//! - [`proxy`]: the uniform execute seam implemented by external agents.
//!
//! Transport, rendering, and CLI surfaces live outside this crate.

pub mod batch;
pub mod catalog;
pub mod config;
pub mod ledger;
pub mod loader;
pub mod proxy;
pub mod router;
pub mod source;
pub mod tracer;

mod runtime;

#[cfg(test)]
pub(crate) mod testkit;

pub use catalog::Catalog;
pub use config::{LedgerConfig, RouterConfig, TracerConfig};
pub use ledger::{ErrorFilter, ErrorLedger, JsonlLedgerStore, LedgerStore, MemoryLedgerStore};
pub use loader::CatalogLoader;
pub use proxy::{AgentProxy, ProxyError, ProxyRegistry};
pub use router::Router;
pub use source::{AgentDefinition, CatalogSource, FileCatalogSource, InMemoryCatalogSource, Revision};
pub use tracer::{LoggingSink, MetricsSnapshot, TraceEvent, TraceSink, Tracer};

//! Orchestrator configuration.

use std::time::Duration;

/// Router configuration.
///
/// The scoring weights implement the capability-match composite: coverage
/// is the fraction of required capabilities an agent covers, precision the
/// fraction of the agent's capabilities that are actually required. A
/// Specialized agent whose capabilities exactly match a task scores higher
/// than a Super agent that merely covers it.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum retries for transient failures.
    pub max_retries: u32,

    /// Base delay for exponential retry backoff.
    pub backoff_base: Duration,

    /// Upper bound on a single backoff delay.
    pub backoff_cap: Duration,

    /// Bounded wait for a concurrency slot on the selected agent.
    pub slot_wait: Duration,

    /// Default execution deadline when the caller supplies none.
    pub default_timeout: Duration,

    /// Weight of the coverage term in the match score.
    pub coverage_weight: f64,

    /// Weight of the precision term in the match score.
    pub precision_weight: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
            backoff_cap: Duration::from_secs(5),
            slot_wait: Duration::from_secs(10),
            default_timeout: Duration::from_secs(30),
            coverage_weight: 0.7,
            precision_weight: 0.3,
        }
    }
}

/// Tracer configuration.
#[derive(Debug, Clone)]
pub struct TracerConfig {
    /// Capacity of the bounded emission queue. A full queue drops the
    /// event with a warning rather than blocking task execution.
    pub queue_capacity: usize,

    /// Re-attempts against the sink before giving up on an event.
    pub emit_retries: u32,

    /// Delay between sink re-attempts.
    pub retry_delay: Duration,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            emit_retries: 2,
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// Error ledger configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Capacity of the in-memory buffer between callers and the store.
    pub queue_capacity: usize,

    /// Re-attempts against the backing store before declaring the write
    /// unrecoverable.
    pub append_retries: u32,

    /// Base delay for store retry backoff.
    pub backoff_base: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            append_retries: 3,
            backoff_base: Duration::from_millis(50),
        }
    }
}

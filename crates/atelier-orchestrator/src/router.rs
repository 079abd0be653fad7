//! Task router: capability scoring, slot acquisition, dispatch, retries.
//!
//! Routing is fully deterministic for a fixed catalog snapshot: the
//! composite match score decides, then kind (Specialized over Super), then
//! the lower in-flight count, then the lower agent id. No randomness ever
//! enters selection.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use atelier_core::{
    AgentDescriptor, AgentId, BatchJob, ErrorRecord, JobId, OrchestratorError, RoutingDecision,
    SpanId, TaskId, TaskOutcome, TaskRequest, TraceSpan,
};

use crate::catalog::Catalog;
use crate::config::RouterConfig;
use crate::ledger::ErrorLedger;
use crate::loader::CatalogLoader;
use crate::proxy::ProxyRegistry;
use crate::runtime::RuntimeRegistry;
use crate::tracer::Tracer;

/// Routes tasks to agents and drives execution to completion or failure.
pub struct Router {
    pub(crate) config: RouterConfig,
    pub(crate) loader: Arc<CatalogLoader>,
    pub(crate) proxies: Arc<ProxyRegistry>,
    pub(crate) ledger: Arc<ErrorLedger>,
    pub(crate) tracer: Arc<Tracer>,
    pub(crate) runtime: RuntimeRegistry,

    /// Task ids currently queued or executing; enforces the
    /// at-most-one-in-flight-per-id invariant.
    in_flight: Mutex<HashSet<TaskId>>,

    /// Cancellation tokens for in-flight tasks.
    cancellations: Mutex<HashMap<TaskId, CancellationToken>>,

    /// Batch jobs by id.
    pub(crate) jobs: RwLock<HashMap<JobId, BatchJob>>,
}

impl Router {
    /// Create a new Router wrapped in Arc.
    pub fn new(
        loader: Arc<CatalogLoader>,
        proxies: Arc<ProxyRegistry>,
        ledger: Arc<ErrorLedger>,
        tracer: Arc<Tracer>,
        config: RouterConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            loader,
            proxies,
            ledger,
            tracer,
            runtime: RuntimeRegistry::new(),
            in_flight: Mutex::new(HashSet::new()),
            cancellations: Mutex::new(HashMap::new()),
            jobs: RwLock::new(HashMap::new()),
        })
    }

    /// Route one task and drive it to a terminal outcome.
    ///
    /// Permanent failures surface immediately; transient ones are retried
    /// up to the configured bound with exponential backoff. Every terminal
    /// failure lands in the ledger exactly once before it is returned.
    pub async fn submit(&self, task: TaskRequest) -> Result<TaskOutcome, OrchestratorError> {
        self.submit_with_context(task, None, &[]).await
    }

    /// Request cancellation of an in-flight task. Queued tasks are
    /// cancelled outright; dispatched tasks get a best-effort signal and
    /// no further retries. Returns false for unknown task ids.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        let cancellations = self
            .cancellations
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        match cancellations.get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Descriptor for one agent with live counters merged in, or `None`
    /// if the catalog does not know the id.
    pub async fn agent_status(
        &self,
        agent_id: &AgentId,
    ) -> Result<Option<AgentDescriptor>, OrchestratorError> {
        let catalog = self.loader.catalog().await?;
        Ok(catalog.get(agent_id).map(|d| self.runtime.describe(d)))
    }

    /// Query the error ledger.
    pub fn query_errors(
        &self,
        filter: &crate::ledger::ErrorFilter,
    ) -> Result<Vec<ErrorRecord>, OrchestratorError> {
        self.ledger.query(filter)
    }

    pub(crate) async fn submit_with_context(
        &self,
        task: TaskRequest,
        parent_span: Option<&SpanId>,
        extra_context: &[(String, String)],
    ) -> Result<TaskOutcome, OrchestratorError> {
        if task.required_capabilities.is_empty() {
            let err = OrchestratorError::ConfigValidation {
                subject: task.id.to_string(),
                field: "required_capabilities",
                reason: "at least one capability is required".into(),
            };
            self.record_failure(&task, &err, 0, extra_context).await;
            return Err(err);
        }

        let token = CancellationToken::new();
        // Guards must not live past this block: the future has to stay Send.
        let duplicate = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            if in_flight.insert(task.id.clone()) {
                let mut cancellations = self
                    .cancellations
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                cancellations.insert(task.id.clone(), token.clone());
                false
            } else {
                true
            }
        };
        if duplicate {
            let err = OrchestratorError::DuplicateTask {
                task_id: task.id.clone(),
            };
            self.record_failure(&task, &err, 0, extra_context).await;
            return Err(err);
        }

        let result = self.drive(&task, &token, parent_span).await;

        {
            let mut cancellations = self
                .cancellations
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            cancellations.remove(&task.id);
            let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            in_flight.remove(&task.id);
        }

        match result {
            Ok(outcome) => Ok(outcome),
            Err((err, retries)) => {
                self.record_failure(&task, &err, retries, extra_context).await;
                Err(err)
            }
        }
    }

    /// Retry loop around single attempts. Retries for one task are
    /// strictly sequential; a later attempt only starts after the
    /// previous one reached a terminal state.
    async fn drive(
        &self,
        task: &TaskRequest,
        token: &CancellationToken,
        parent_span: Option<&SpanId>,
    ) -> Result<TaskOutcome, (OrchestratorError, u32)> {
        let mut attempt: u32 = 0;
        loop {
            if token.is_cancelled() {
                return Err((
                    OrchestratorError::Cancelled {
                        task_id: task.id.clone(),
                    },
                    attempt,
                ));
            }

            match self.attempt_once(task, token, parent_span, attempt).await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => {
                    let retryable = err.is_transient() && attempt < self.config.max_retries;
                    if !retryable {
                        return Err((err, attempt));
                    }

                    attempt += 1;
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        task_id = %task.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );

                    tokio::select! {
                        _ = token.cancelled() => {
                            return Err((
                                OrchestratorError::Cancelled { task_id: task.id.clone() },
                                attempt,
                            ));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn attempt_once(
        &self,
        task: &TaskRequest,
        token: &CancellationToken,
        parent_span: Option<&SpanId>,
        attempt: u32,
    ) -> Result<TaskOutcome, OrchestratorError> {
        let catalog = self.loader.catalog().await?;
        self.runtime.sync(&catalog);

        let (agent_id, score) = self.select_agent(&catalog, task)?;
        let decision = RoutingDecision::new(task.id.clone(), agent_id.clone(), score);

        let runtime = self
            .runtime
            .get(&agent_id)
            .ok_or_else(|| OrchestratorError::AgentUnavailable {
                agent_id: agent_id.clone(),
                waited_ms: 0,
            })?;

        let proxy = self
            .proxies
            .get(&agent_id)
            .ok_or_else(|| OrchestratorError::ConfigValidation {
                subject: agent_id.to_string(),
                field: "proxy",
                reason: "no proxy registered for agent".into(),
            })?;

        // Bounded wait for a concurrency slot; a queued task is not a
        // failed task until the wait bound is exceeded.
        let wait_started = Instant::now();
        let permit = tokio::select! {
            _ = token.cancelled() => {
                return Err(OrchestratorError::Cancelled { task_id: task.id.clone() });
            }
            acquired = tokio::time::timeout(
                self.config.slot_wait,
                Arc::clone(&runtime.semaphore).acquire_owned(),
            ) => match acquired {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) | Err(_) => {
                    return Err(OrchestratorError::AgentUnavailable {
                        agent_id: agent_id.clone(),
                        waited_ms: wait_started.elapsed().as_millis() as u64,
                    });
                }
            }
        };

        let timeout = task
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.default_timeout);

        runtime.begin();
        self.tracer.record_dispatch(&agent_id);
        // Latency is billed from dispatch, not from the slot wait, so the
        // metric and the span share the same reference point.
        let dispatched_at = Instant::now();

        let mut span = match parent_span {
            Some(parent) => TraceSpan::child_of(parent, "route_task"),
            None => TraceSpan::start("route_task"),
        };
        span.set_attribute("task_id", task.id.as_str());
        span.set_attribute("agent_id", agent_id.as_str());
        span.set_attribute("match_score", format!("{score:.3}"));
        span.set_attribute("attempt", attempt.to_string());

        info!(
            task_id = %task.id,
            agent_id = %agent_id,
            match_score = score,
            attempt,
            "Dispatching task"
        );

        let executed = tokio::select! {
            _ = token.cancelled() => {
                proxy.cancel(&task.id).await;
                Err(OrchestratorError::Cancelled { task_id: task.id.clone() })
            }
            result = tokio::time::timeout(
                timeout,
                proxy.execute(&task.id, &task.payload, timeout),
            ) => match result {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(proxy_err)) => Err(OrchestratorError::AgentExecution {
                    agent_id: agent_id.clone(),
                    message: proxy_err.message,
                    transient: proxy_err.transient,
                }),
                Err(_) => Err(OrchestratorError::Timeout {
                    task_id: task.id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            }
        };

        let success = executed.is_ok();
        runtime.finish(success);
        drop(permit);

        let latency_ms = dispatched_at.elapsed().as_millis() as u64;
        span.set_attribute(
            "outcome",
            match &executed {
                Ok(_) => "success".to_string(),
                Err(err) => err.kind().as_str().to_string(),
            },
        );
        span.end();
        self.tracer.record_outcome(&agent_id, latency_ms, !success);
        self.tracer.emit_span(span);

        executed.map(|output| TaskOutcome {
            decision,
            output,
            retries: attempt,
        })
    }

    /// Deterministic candidate selection over one catalog snapshot.
    fn select_agent(
        &self,
        catalog: &Catalog,
        task: &TaskRequest,
    ) -> Result<(AgentId, f64), OrchestratorError> {
        let required = &task.required_capabilities;

        let mut best: Option<(&AgentDescriptor, f64, u32)> = None;
        for agent in catalog.candidates(required) {
            let overlap = required.intersection(&agent.capabilities).count() as f64;
            let coverage = overlap / required.len() as f64;
            let precision = overlap / agent.capabilities.len() as f64;
            let score = self.config.coverage_weight * coverage
                + self.config.precision_weight * precision;
            let in_flight = self.runtime.in_flight(&agent.id);

            best = Some(match best {
                None => (agent, score, in_flight),
                Some(current) => {
                    if prefer((agent, score, in_flight), current) {
                        (agent, score, in_flight)
                    } else {
                        current
                    }
                }
            });
        }

        match best {
            Some((agent, score, _)) => Ok((agent.id.clone(), score.clamp(0.0, 1.0))),
            None => Err(OrchestratorError::AgentNotFound {
                required_capabilities: required.iter().cloned().collect(),
            }),
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .config
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let capped = exponential.min(self.config.backoff_cap);
        let jitter_bound = (capped.as_millis() as u64 / 4).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_bound);
        capped + Duration::from_millis(jitter)
    }

    async fn record_failure(
        &self,
        task: &TaskRequest,
        err: &OrchestratorError,
        retries: u32,
        extra_context: &[(String, String)],
    ) {
        let mut record = ErrorRecord::for_task(task.id.clone(), err)
            .with_context("retry_count", retries.to_string());
        if let Some(agent_id) = error_agent(err) {
            record = record.with_context("agent_id", agent_id.as_str());
        }
        for (key, value) in extra_context {
            record = record.with_context(key.clone(), value.clone());
        }
        self.ledger.record(record).await;
    }
}

/// True when `challenger` should replace `current`: higher score, then
/// Specialized over Super, then lower in-flight load, then lower id.
fn prefer(
    challenger: (&AgentDescriptor, f64, u32),
    current: (&AgentDescriptor, f64, u32),
) -> bool {
    let (ca, cs, cl) = challenger;
    let (ba, bs, bl) = current;
    match cs.total_cmp(&bs) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => {
            (kind_rank(ca), cl, &ca.id) < (kind_rank(ba), bl, &ba.id)
        }
    }
}

fn kind_rank(agent: &AgentDescriptor) -> u8 {
    match agent.kind {
        atelier_core::AgentKind::Specialized => 0,
        atelier_core::AgentKind::Super => 1,
    }
}

fn error_agent(err: &OrchestratorError) -> Option<&AgentId> {
    match err {
        OrchestratorError::AgentUnavailable { agent_id, .. }
        | OrchestratorError::AgentExecution { agent_id, .. } => Some(agent_id),
        _ => None,
    }
}

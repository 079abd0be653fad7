//! Batch fan-out driver.
//!
//! A batch routes each item payload as an independent single task against
//! one target capability. The fan-out is bounded by a worker pool sized to
//! the aggregate concurrency the catalog offers for that capability, so a
//! batch can saturate its agents without piling unbounded work behind
//! their semaphores.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

use atelier_core::{BatchJob, BatchStatus, JobId, OrchestratorError, TaskRequest, TraceSpan};

use crate::router::Router;

impl Router {
    /// Start a batch job and return its id immediately.
    ///
    /// The job runs in the background; poll [`Router::batch_job`] for
    /// progress and query the ledger by `job_id` for per-item failures.
    pub async fn submit_batch(
        self: &Arc<Self>,
        target_capability: impl Into<String>,
        items: Vec<String>,
    ) -> Result<JobId, OrchestratorError> {
        let target_capability = target_capability.into();
        if target_capability.is_empty() {
            return Err(OrchestratorError::ConfigValidation {
                subject: "batch".into(),
                field: "target_capability",
                reason: "target capability must not be empty".into(),
            });
        }

        let job = BatchJob::new(target_capability.clone(), items.len() as u32);
        let job_id = job.id.clone();

        {
            let mut jobs = self.jobs.write().await;
            jobs.insert(job_id.clone(), job);
        }

        info!(
            job_id = %job_id,
            target_capability = %target_capability,
            items = items.len(),
            "Batch job accepted"
        );

        let router = Arc::clone(self);
        let spawned_job_id = job_id.clone();
        tokio::spawn(async move {
            router
                .run_batch(spawned_job_id, target_capability, items)
                .await;
        });

        Ok(job_id)
    }

    /// Snapshot of a batch job for polling, or `None` for unknown ids.
    pub async fn batch_job(&self, job_id: &JobId) -> Option<BatchJob> {
        let jobs = self.jobs.read().await;
        jobs.get(job_id).cloned()
    }

    async fn run_batch(self: Arc<Self>, job_id: JobId, target_capability: String, items: Vec<String>) {
        {
            let mut jobs = self.jobs.write().await;
            if let Some(job) = jobs.get_mut(&job_id) {
                job.status = BatchStatus::Running;
            }
        }

        let mut span = TraceSpan::start("batch_job");
        span.set_attribute("job_id", job_id.as_str());
        span.set_attribute("target_capability", target_capability.as_str());
        span.set_attribute("items", items.len().to_string());
        let parent_span_id = span.span_id.clone();

        let pool = Arc::new(Semaphore::new(self.batch_pool_size(&target_capability).await));
        let mut workers = JoinSet::new();

        for payload in items {
            let router = Arc::clone(&self);
            let pool = Arc::clone(&pool);
            let job_id = job_id.clone();
            let target_capability = target_capability.clone();
            let parent_span_id = parent_span_id.clone();

            workers.spawn(async move {
                // Closed only when the pool is dropped, which cannot happen
                // while a worker still holds a clone.
                let Ok(_permit) = pool.acquire_owned().await else {
                    return;
                };

                let task = TaskRequest::new([target_capability], payload);
                let context = [("job_id".to_string(), job_id.to_string())];
                let failed = router
                    .submit_with_context(task, Some(&parent_span_id), &context)
                    .await
                    .is_err();

                let mut jobs = router.jobs.write().await;
                if let Some(job) = jobs.get_mut(&job_id) {
                    job.record_item(failed);
                }
            });
        }

        while workers.join_next().await.is_some() {}

        let finished = {
            let mut jobs = self.jobs.write().await;
            jobs.get_mut(&job_id).map(|job| {
                job.finalize();
                (job.status, job.processed_count, job.failed_count)
            })
        };

        if let Some((status, processed, failed)) = finished {
            span.set_attribute("outcome", format!("{status:?}"));
            info!(
                job_id = %job_id,
                ?status,
                processed,
                failed,
                "Batch job finished"
            );
        }
        span.end();
        self.tracer.emit_span(span);
    }

    /// Worker pool size for one capability: the combined concurrency of
    /// every routable agent that covers it, floored at one so a batch with
    /// no covering agents still drains (each item failing individually).
    async fn batch_pool_size(&self, target_capability: &str) -> usize {
        let mut required = BTreeSet::new();
        required.insert(target_capability.to_string());

        match self.loader.catalog().await {
            Ok(catalog) => catalog
                .candidates(&required)
                .map(|agent| agent.max_concurrency as usize)
                .sum::<usize>()
                .max(1),
            Err(_) => 1,
        }
    }
}

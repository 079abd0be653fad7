//! Batch job types.

use crate::ids::JobId;
use crate::status::BatchStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A batch of item payloads dispatched against one target capability.
///
/// Progress counters are owned by the router's fan-out driver; external
/// callers poll snapshots of this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    /// Unique job identifier.
    pub id: JobId,

    /// Capability every item requires.
    pub target_capability: String,

    /// Current job status.
    pub status: BatchStatus,

    /// Items that reached a terminal outcome (success or final failure).
    pub processed_count: u32,

    /// Items whose terminal outcome was a failure.
    pub failed_count: u32,

    /// Total number of items in the job.
    pub total_count: u32,

    /// When the job was created.
    pub created_at: DateTime<Utc>,
}

impl BatchJob {
    /// Create a new pending job.
    pub fn new(target_capability: impl Into<String>, total_count: u32) -> Self {
        Self {
            id: JobId::generate(),
            target_capability: target_capability.into(),
            status: BatchStatus::Pending,
            processed_count: 0,
            failed_count: 0,
            total_count,
            created_at: Utc::now(),
        }
    }

    /// Progress in percent, always within [0.0, 100.0].
    pub fn progress_percentage(&self) -> f64 {
        if self.total_count == 0 {
            return 100.0;
        }
        f64::from(self.processed_count.min(self.total_count)) / f64::from(self.total_count) * 100.0
    }

    /// Record one item's terminal outcome. Counters never exceed the total.
    pub fn record_item(&mut self, failed: bool) {
        if self.processed_count < self.total_count {
            self.processed_count += 1;
            if failed {
                self.failed_count += 1;
            }
        }
    }

    /// Derive the terminal status once every item has been processed.
    pub fn finalize(&mut self) {
        self.status = if self.total_count > 0 && self.failed_count == self.total_count {
            BatchStatus::Failed
        } else {
            BatchStatus::Completed
        };
    }
}

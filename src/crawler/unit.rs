//! Traversal unit commit
//!
//! Both planners hand each unit (a listing page or an identifier chunk) to
//! `UnitCommitter`, which dispatches the unit's jobs, waits for all of them
//! to finish, flushes the sink, and only then saves the checkpoint.

use crate::crawler::workers::{BarrierSummary, PageBarrier, QueuedJob, WorkQueue};
use crate::output::CrawlStatistics;
use crate::state::{CrawlPosition, DetailJob};
use crate::storage::{CheckpointRecord, CheckpointStore, ResultSink, StorageError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of committing one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// Every job finished and the checkpoint now points at this unit
    Committed(BarrierSummary),
    /// Shutdown cut the unit short; the checkpoint was left alone
    Interrupted(BarrierSummary),
}

/// How a planner run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOutcome {
    Completed,
    Interrupted,
}

#[derive(Clone)]
pub struct UnitCommitter {
    sink: Arc<ResultSink>,
    checkpoint: Arc<dyn CheckpointStore>,
    stats: Arc<CrawlStatistics>,
    config_hash: Option<String>,
    progress_every: u64,
    shutdown: CancellationToken,
}

impl UnitCommitter {
    pub fn new(
        sink: Arc<ResultSink>,
        checkpoint: Arc<dyn CheckpointStore>,
        stats: Arc<CrawlStatistics>,
        config_hash: Option<String>,
        progress_every: u64,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            sink,
            checkpoint,
            stats,
            config_hash,
            progress_every: progress_every.max(1),
            shutdown,
        }
    }

    pub fn stats(&self) -> &Arc<CrawlStatistics> {
        &self.stats
    }

    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Dispatches `jobs`, waits for them, flushes, and saves `position`
    pub async fn commit(
        &self,
        queue: &WorkQueue,
        jobs: Vec<DetailJob>,
        position: &CrawlPosition,
    ) -> crate::Result<UnitOutcome> {
        let barrier = PageBarrier::new(position.to_string());
        let total = jobs.len();
        let mut dispatched = 0usize;

        for job in jobs {
            if self.shutdown.is_cancelled() {
                break;
            }
            barrier.register();
            self.stats.job_dispatched();
            if let Err(rejected) = queue.push(QueuedJob::new(job, barrier.clone())).await {
                tracing::warn!(
                    url = %rejected.job.target_url,
                    "No workers left to take the job"
                );
                self.stats.job_interrupted();
                barrier.complete(crate::crawler::workers::JobOutcome::Interrupted);
                break;
            }
            dispatched += 1;
        }

        let summary = barrier.wait().await;
        self.sink.flush().await?;

        if dispatched < total || !summary.is_complete() {
            tracing::warn!(
                position = %position,
                dispatched,
                total,
                interrupted = summary.interrupted,
                "Unit interrupted, checkpoint not advanced"
            );
            return Ok(UnitOutcome::Interrupted(summary));
        }

        let store = Arc::clone(&self.checkpoint);
        let record = CheckpointRecord::new(position.clone(), self.config_hash.clone());
        tokio::task::spawn_blocking(move || store.save(&record))
            .await
            .map_err(StorageError::from)??;

        let completed = self.stats.unit_completed();
        tracing::info!(
            class_code = %position.class_code,
            page = position.page_number,
            stored = summary.stored,
            dropped = summary.dropped,
            "Unit complete"
        );
        if completed % self.progress_every == 0 {
            self.stats.log_progress();
        }

        Ok(UnitOutcome::Committed(summary))
    }
}

impl std::fmt::Debug for UnitCommitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitCommitter")
            .field("config_hash", &self.config_hash)
            .field("progress_every", &self.progress_every)
            .finish()
    }
}

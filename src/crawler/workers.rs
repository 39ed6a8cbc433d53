//! Bounded work queue and detail worker pool
//!
//! Planners push detail jobs into a capacity-bounded channel and block while
//! it is full. A fixed number of workers share the receiving end. Every job
//! carries the `PageBarrier` of the traversal unit it came from, and a
//! planner waits on that barrier before flushing and checkpointing the unit.

use crate::crawler::fetcher::{FetchClient, FetchContext, FetchResult};
use crate::crawler::pacer::{random_between, PauseKind};
use crate::crawler::parser::DetailParser;
use crate::output::CrawlStatistics;
use crate::state::DetailJob;
use crate::storage::ResultSink;
use crate::ParseError;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Terminal state of one detail job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Parsed and handed to the result sink
    Stored,
    /// Given up on after logging
    Dropped,
    /// Abandoned because of shutdown
    Interrupted,
}

/// Tracks the detail jobs of one traversal unit
#[derive(Debug)]
pub struct PageBarrier {
    label: String,
    pending: AtomicUsize,
    stored: AtomicUsize,
    dropped: AtomicUsize,
    interrupted: AtomicUsize,
    notify: Notify,
}

/// Per-outcome counts of a finished unit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BarrierSummary {
    pub stored: usize,
    pub dropped: usize,
    pub interrupted: usize,
}

impl BarrierSummary {
    pub fn total(&self) -> usize {
        self.stored + self.dropped + self.interrupted
    }

    /// True when no job was cut short by shutdown
    pub fn is_complete(&self) -> bool {
        self.interrupted == 0
    }
}

impl PageBarrier {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            pending: AtomicUsize::new(0),
            stored: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
            interrupted: AtomicUsize::new(0),
            notify: Notify::new(),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Registers one job that must finish before the barrier opens
    pub fn register(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    pub fn complete(&self, outcome: JobOutcome) {
        let counter = match outcome {
            JobOutcome::Stored => &self.stored,
            JobOutcome::Dropped => &self.dropped,
            JobOutcome::Interrupted => &self.interrupted,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn summary(&self) -> BarrierSummary {
        BarrierSummary {
            stored: self.stored.load(Ordering::SeqCst),
            dropped: self.dropped.load(Ordering::SeqCst),
            interrupted: self.interrupted.load(Ordering::SeqCst),
        }
    }

    /// Waits until every registered job reached a terminal state
    pub async fn wait(&self) -> BarrierSummary {
        loop {
            let notified = self.notify.notified();
            if self.pending() == 0 {
                return self.summary();
            }
            notified.await;
        }
    }
}

/// A detail job on its way through the queue
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub job: Arc<DetailJob>,
    /// 1-based count of times this job has been attempted
    pub attempt: u32,
    pub barrier: Arc<PageBarrier>,
}

impl QueuedJob {
    pub fn new(job: DetailJob, barrier: Arc<PageBarrier>) -> Self {
        Self {
            job: Arc::new(job),
            attempt: 1,
            barrier,
        }
    }
}

/// Capacity-bounded job queue
///
/// `push` waits while the queue is full; nothing is ever dropped.
#[derive(Debug)]
pub struct WorkQueue {
    sender: mpsc::Sender<QueuedJob>,
    receiver: Arc<Mutex<mpsc::Receiver<QueuedJob>>>,
    capacity: usize,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            capacity,
        }
    }

    /// Enqueues a job, waiting for room
    ///
    /// Returns the job back if every consumer is gone.
    pub async fn push(&self, job: QueuedJob) -> Result<(), QueuedJob> {
        self.sender.send(job).await.map_err(|e| e.0)
    }

    /// Enqueues a job only if there is room right now
    pub fn try_push(&self, job: QueuedJob) -> Result<(), QueuedJob> {
        self.sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(job) | TrySendError::Closed(job) => job,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Jobs currently waiting in the queue
    pub fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn consumer(&self) -> Arc<Mutex<mpsc::Receiver<QueuedJob>>> {
        Arc::clone(&self.receiver)
    }

    fn requeue_handle(&self) -> mpsc::WeakSender<QueuedJob> {
        self.sender.downgrade()
    }
}

/// Knobs for the detail workers
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub concurrency: usize,
    /// Attempts per job before a retryable outcome is given up on
    pub retry_limit: u32,
    /// Base delay before re-trying an empty page, multiplied by the attempt
    pub empty_retry_delay: Duration,
    pub reading_pause_probability: f64,
    pub reading_pause_min_ms: u64,
    pub reading_pause_max_ms: u64,
}

impl WorkerSettings {
    pub fn from_config(config: &crate::config::CrawlerConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            retry_limit: config.detail_retry_limit.max(1),
            empty_retry_delay: Duration::from_millis(config.empty_retry_delay_ms),
            reading_pause_probability: config.reading_pause_probability,
            reading_pause_min_ms: config.reading_pause_min_ms,
            reading_pause_max_ms: config.reading_pause_max_ms,
        }
    }
}

/// Shared state every worker needs
struct WorkerContext {
    fetcher: Arc<FetchClient>,
    parser: Arc<dyn DetailParser>,
    sink: Arc<ResultSink>,
    stats: Arc<CrawlStatistics>,
    settings: WorkerSettings,
    shutdown: CancellationToken,
}

/// What one pass over a job decided
enum Step {
    Done(JobOutcome),
    Retry(String),
}

impl WorkerContext {
    async fn process(&self, job: &DetailJob) -> Step {
        let url = &job.target_url;
        let ctx = FetchContext {
            expected_marker: self.parser.expected_marker().map(str::to_string),
        };

        match self.fetcher.fetch(url, &ctx).await {
            FetchResult::Success(document) => {
                let parsed = self.parser.parse(&document, job);
                match parsed {
                    Ok(record) => {
                        if let Err(e) = self.sink.accept(record).await {
                            tracing::error!(url = %url, "Failed to write batch: {}", e);
                        }
                        self.stats.record_stored();
                        self.reading_pause().await;
                        Step::Done(JobOutcome::Stored)
                    }
                    Err(ParseError::Missing(what)) => Step::Retry(format!("{} missing", what)),
                    Err(e) => {
                        self.stats.parse_failed();
                        tracing::warn!(
                            url = %url,
                            identifier = %job.company_identifier,
                            class_code = %job.context.class_code,
                            page = job.context.page_number,
                            "Skipping unparseable page: {}",
                            e
                        );
                        Step::Done(JobOutcome::Dropped)
                    }
                }
            }
            FetchResult::Retryable { reason, .. } => Step::Retry(reason),
            FetchResult::Fatal { reason } => {
                if self.shutdown.is_cancelled() {
                    return Step::Done(JobOutcome::Interrupted);
                }
                tracing::warn!(
                    url = %url,
                    identifier = %job.company_identifier,
                    class_code = %job.context.class_code,
                    "Dropping detail job: {}",
                    reason
                );
                Step::Done(JobOutcome::Dropped)
            }
        }
    }

    async fn reading_pause(&self) {
        let probability = self.settings.reading_pause_probability.clamp(0.0, 1.0);
        let read = rand::thread_rng().gen_bool(probability);
        if read {
            let delay = random_between(
                self.settings.reading_pause_min_ms,
                self.settings.reading_pause_max_ms,
            );
            self.fetcher.pacer().pause(PauseKind::Reading, delay).await;
        }
    }

    /// Runs one dequeued job until it finishes or is handed back to the queue
    async fn handle(&self, mut queued: QueuedJob, requeue: &mpsc::WeakSender<QueuedJob>) {
        loop {
            if self.shutdown.is_cancelled() {
                self.finish(&queued, JobOutcome::Interrupted);
                return;
            }

            let reason = match self.process(&queued.job).await {
                Step::Done(outcome) => {
                    self.finish(&queued, outcome);
                    return;
                }
                Step::Retry(reason) => reason,
            };

            if queued.attempt >= self.settings.retry_limit {
                tracing::warn!(
                    url = %queued.job.target_url,
                    identifier = %queued.job.company_identifier,
                    attempt = queued.attempt,
                    "Giving up on detail page: {}",
                    reason
                );
                self.finish(&queued, JobOutcome::Dropped);
                return;
            }

            tracing::debug!(
                url = %queued.job.target_url,
                attempt = queued.attempt,
                "Retrying later: {}",
                reason
            );
            self.stats.job_retried();
            let delay = self.settings.empty_retry_delay * queued.attempt;
            self.fetcher
                .pacer()
                .pause(PauseKind::EmptyRetry, delay)
                .await;
            queued.attempt += 1;

            // Hand the job back to the queue; keep it here if there is no room
            let Some(sender) = requeue.upgrade() else {
                continue;
            };
            match sender.try_send(queued) {
                Ok(()) => return,
                Err(TrySendError::Full(job)) | Err(TrySendError::Closed(job)) => queued = job,
            }
        }
    }

    fn finish(&self, queued: &QueuedJob, outcome: JobOutcome) {
        match outcome {
            JobOutcome::Stored => {}
            JobOutcome::Dropped => self.stats.job_dropped(),
            JobOutcome::Interrupted => {
                self.stats.job_interrupted();
                tracing::warn!(
                    url = %queued.job.target_url,
                    identifier = %queued.job.company_identifier,
                    unit = queued.barrier.label(),
                    "Detail job interrupted by shutdown"
                );
            }
        }
        queued.barrier.complete(outcome);
    }
}

/// Fixed-size pool of detail workers
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `settings.concurrency` workers consuming from `queue`
    ///
    /// Workers exit once the queue has been dropped and drained.
    pub fn spawn(
        queue: &WorkQueue,
        fetcher: Arc<FetchClient>,
        parser: Arc<dyn DetailParser>,
        sink: Arc<ResultSink>,
        stats: Arc<CrawlStatistics>,
        settings: WorkerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let concurrency = settings.concurrency.max(1);
        let context = Arc::new(WorkerContext {
            fetcher,
            parser,
            sink,
            stats,
            settings,
            shutdown,
        });

        let handles = (0..concurrency)
            .map(|id| {
                let context = Arc::clone(&context);
                let receiver = queue.consumer();
                let requeue = queue.requeue_handle();

                tokio::spawn(async move {
                    tracing::debug!("Worker {} started", id);
                    loop {
                        let next = {
                            let mut receiver = receiver.lock().await;
                            receiver.recv().await
                        };
                        let Some(queued) = next else {
                            break;
                        };
                        context.handle(queued, &requeue).await;
                    }
                    tracing::debug!("Worker {} finished", id);
                })
            })
            .collect();

        Self { handles }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Closes the queue and waits for every worker to drain it
    pub async fn finish(self, queue: WorkQueue) {
        drop(queue);
        for handle in self.handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.handles.len())
            .finish()
    }
}

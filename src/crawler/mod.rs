//! Crawler module for catalog traversal and detail fetching
//!
//! This module contains the core crawling logic, including:
//! - HTTP fetching with retry, backoff, and identity rotation
//! - Pluggable catalog and company-page parsers
//! - The bounded detail queue and worker pool
//! - Catalog and identifier-list planners
//! - Overall crawl wiring

mod fetcher;
mod identifiers;
mod pacer;
mod parser;
mod planner;
mod transport;
mod unit;
mod workers;

pub use fetcher::{Document, FetchClient, FetchContext, FetchPolicy, FetchResult};
pub use identifiers::{detail_url, input_label, read_identifiers, IdentifierPlanner};
pub use pacer::{backoff_delay, random_between, Pacer, PauseKind, RecordingPacer, TokioPacer};
pub use parser::{
    clean_text, normalize_key, CatalogParser, ChapterEntry, ChapterRow, DetailParser, ListingLink,
    SectionEntry, WithMarker, YouControlCatalog, YouControlDetail,
};
pub use planner::{Planner, PlannerPacing};
pub use transport::{build_http_client, RawResponse, ReqwestTransport, Transport, TransportError};
pub use unit::{PlanOutcome, UnitCommitter, UnitOutcome};
pub use workers::{
    BarrierSummary, JobOutcome, PageBarrier, QueuedJob, WorkQueue, WorkerPool, WorkerSettings,
};

use crate::config::{Config, SourceMode};
use crate::output::{CrawlStatistics, StatisticsSnapshot};
use crate::session::{SessionRotator, SessionSeeder, StaticCookieSeeder};
use crate::storage::{self, CheckpointStore, JsonCheckpointStore};
use crate::{ConfigError, KvedError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Per-run options that do not live in the configuration file
#[derive(Debug, Clone, Default)]
pub struct CrawlOptions {
    /// Discard any checkpoint and start from the beginning
    pub fresh: bool,
    /// Hash of the configuration file, recorded in every checkpoint
    pub config_hash: Option<String>,
}

/// Swappable collaborators of a crawl
pub struct CrawlComponents {
    pub transport: Arc<dyn Transport>,
    pub pacer: Arc<dyn Pacer>,
    pub catalog: Arc<dyn CatalogParser>,
    pub detail: Arc<dyn DetailParser>,
    pub seeder: Option<Arc<dyn SessionSeeder>>,
}

impl CrawlComponents {
    /// Network transport, real sleeps, and the YouControl parsers
    pub fn production(config: &Config, shutdown: &CancellationToken) -> Self {
        let detail: Arc<dyn DetailParser> = match &config.source.detail_marker {
            Some(marker) => Arc::new(WithMarker::new(YouControlDetail, marker.as_str())),
            None => Arc::new(YouControlDetail),
        };
        Self {
            transport: Arc::new(ReqwestTransport::new(&config.crawler)),
            pacer: Arc::new(TokioPacer::new(shutdown.clone())),
            catalog: Arc::new(YouControlCatalog),
            detail,
            seeder: None,
        }
    }
}

/// What a finished run reports back
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub outcome: PlanOutcome,
    pub stats: StatisticsSnapshot,
}

/// Runs a complete crawl with the production components
///
/// This is the main entry point for starting a crawl. It will:
/// 1. Load the checkpoint (or clear it with `fresh`)
/// 2. Seed the first session
/// 3. Start the detail worker pool
/// 4. Run the catalog or identifier planner
/// 5. Drain the workers and flush the sink
pub async fn run_crawl(
    config: &Config,
    options: &CrawlOptions,
    shutdown: CancellationToken,
) -> crate::Result<CrawlReport> {
    let components = CrawlComponents::production(config, &shutdown);
    run_crawl_with(config, options, components, shutdown).await
}

/// Origin of the site cookies are seeded for
fn seed_site(config: &Config) -> Option<Url> {
    let raw = match config.source.mode {
        SourceMode::Catalog => config.source.root_url.clone(),
        SourceMode::Identifiers => config
            .source
            .detail_url_template
            .as_ref()
            .map(|t| t.replace("{id}", "0")),
    }?;
    let url = Url::parse(&raw).ok()?;
    url.join("/").ok()
}

fn missing(field: &str) -> KvedError {
    KvedError::Config(ConfigError::Validation(format!(
        "source.{} is required for this mode",
        field
    )))
}

/// Runs a complete crawl with the given collaborators
pub async fn run_crawl_with(
    config: &Config,
    options: &CrawlOptions,
    components: CrawlComponents,
    shutdown: CancellationToken,
) -> crate::Result<CrawlReport> {
    let checkpoint: Arc<dyn CheckpointStore> =
        Arc::new(JsonCheckpointStore::new(&config.output.checkpoint_path));

    if options.fresh {
        tracing::info!("Fresh start requested, discarding checkpoint");
        checkpoint.clear()?;
    }

    let resume = checkpoint.load();
    if let Some(record) = &resume {
        tracing::info!(
            "Found checkpoint at {} (saved {})",
            record.position,
            record.timestamp
        );
        if let (Some(saved), Some(current)) = (&record.config_hash, &options.config_hash) {
            if saved != current {
                tracing::warn!("Configuration changed since the checkpoint was written");
            }
        }
    }

    let rotator = Arc::new(SessionRotator::new(&config.identity));
    let seeder = components.seeder.clone().or_else(|| {
        seed_site(config).map(|site| {
            Arc::new(StaticCookieSeeder::new(config.identity.cookies.clone(), site))
                as Arc<dyn SessionSeeder>
        })
    });
    if let Some(seeder) = seeder {
        seeder.seed(&rotator.current()).await?;
    }

    let fetcher = Arc::new(FetchClient::new(
        components.transport,
        Arc::clone(&rotator),
        components.pacer,
        FetchPolicy::from_config(&config.crawler, &config.identity),
        shutdown.clone(),
    ));
    let sink = Arc::new(storage::open_sink(&config.output)?);
    let stats = Arc::new(CrawlStatistics::new());
    let committer = UnitCommitter::new(
        Arc::clone(&sink),
        Arc::clone(&checkpoint),
        Arc::clone(&stats),
        options.config_hash.clone(),
        config.crawler.progress_every,
        shutdown.clone(),
    );

    let queue = WorkQueue::new(config.crawler.queue_capacity);
    let pool = WorkerPool::spawn(
        &queue,
        Arc::clone(&fetcher),
        components.detail,
        Arc::clone(&sink),
        Arc::clone(&stats),
        WorkerSettings::from_config(&config.crawler),
        shutdown.clone(),
    );
    tracing::info!(
        "Started {} workers (queue capacity {})",
        pool.size(),
        queue.capacity()
    );

    let resume_position = resume.map(|r| r.position);
    let result = match config.source.mode {
        SourceMode::Catalog => {
            let root = config.source.root_url.as_deref().ok_or_else(|| missing("root-url"));
            match root.and_then(|r| Url::parse(r).map_err(KvedError::from)) {
                Ok(root) => {
                    let mut planner = Planner::new(
                        Arc::clone(&fetcher),
                        components.catalog,
                        committer,
                        root,
                        config.source.class_filter.clone(),
                        PlannerPacing::from_config(&config.crawler),
                    );
                    planner.run(&queue, resume_position).await
                }
                Err(e) => Err(e),
            }
        }
        SourceMode::Identifiers => {
            match (
                config.source.identifiers_csv.as_ref(),
                config.source.detail_url_template.as_ref(),
            ) {
                (Some(csv_path), Some(template)) => {
                    let mut planner = IdentifierPlanner::new(
                        Arc::clone(&fetcher),
                        committer,
                        csv_path,
                        config.source.identifier_column.clone(),
                        template.clone(),
                        config.source.chunk_size,
                    )
                    .with_chunk_pause(
                        config.crawler.page_pause_min_ms,
                        config.crawler.page_pause_max_ms,
                    );
                    planner.run(&queue, resume_position).await
                }
                (None, _) => Err(missing("identifiers-csv")),
                (_, None) => Err(missing("detail-url-template")),
            }
        }
    };

    // Workers drain whatever is still queued before the final flush
    pool.finish(queue).await;
    let flushed = sink.flush().await;

    let outcome = result?;
    flushed?;

    let snapshot = stats.snapshot(rotator.rotations(), rotator.requests());
    match outcome {
        PlanOutcome::Completed => tracing::info!(
            "Crawl complete: {} records in {} units",
            snapshot.records_stored,
            snapshot.units_completed
        ),
        PlanOutcome::Interrupted => tracing::warn!(
            "Crawl interrupted after {} units; rerun to resume from the checkpoint",
            snapshot.units_completed
        ),
    }

    Ok(CrawlReport {
        outcome,
        stats: snapshot,
    })
}

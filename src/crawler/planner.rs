//! Hierarchical crawl planner
//!
//! Walks the catalog tree section → chapter → group → class → listing page
//! and turns every listing page into one committed unit of detail jobs.
//!
//! # Failure Policy
//!
//! Only the catalog root is essential. A chapter, class, or listing page
//! that cannot be fetched is logged and its subtree skipped; traversal goes
//! on with the siblings.

use crate::crawler::fetcher::{Document, FetchClient, FetchContext, FetchResult};
use crate::crawler::pacer::{random_between, PauseKind};
use crate::crawler::parser::{CatalogParser, ChapterRow, SectionEntry};
use crate::crawler::unit::{PlanOutcome, UnitCommitter, UnitOutcome};
use crate::crawler::workers::WorkQueue;
use crate::state::{CrawlPosition, DetailJob, HierarchyContext, PlannerState, ResumeCursor};
use crate::KvedError;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Pauses and retry bounds for catalog pages
#[derive(Debug, Clone)]
pub struct PlannerPacing {
    pub page_pause_min_ms: u64,
    pub page_pause_max_ms: u64,
    pub class_pause_min_ms: u64,
    pub class_pause_max_ms: u64,
    /// Attempts for a catalog page that keeps coming back empty
    pub empty_retries: u32,
    pub empty_retry_delay: Duration,
}

impl PlannerPacing {
    pub fn from_config(config: &crate::config::CrawlerConfig) -> Self {
        Self {
            page_pause_min_ms: config.page_pause_min_ms,
            page_pause_max_ms: config.page_pause_max_ms,
            class_pause_min_ms: config.class_pause_min_ms,
            class_pause_max_ms: config.class_pause_max_ms,
            empty_retries: config.detail_retry_limit.max(1),
            empty_retry_delay: Duration::from_millis(config.empty_retry_delay_ms),
        }
    }
}

/// Outcome of walking one class
enum ClassOutcome {
    Done,
    Skipped,
    Interrupted,
}

/// Drives the catalog traversal and owns checkpoint advancement
pub struct Planner {
    fetcher: Arc<FetchClient>,
    catalog: Arc<dyn CatalogParser>,
    committer: UnitCommitter,
    root: Url,
    class_filter: BTreeSet<String>,
    pacing: PlannerPacing,
    state: PlannerState,
}

impl Planner {
    pub fn new(
        fetcher: Arc<FetchClient>,
        catalog: Arc<dyn CatalogParser>,
        committer: UnitCommitter,
        root: Url,
        class_filter: impl IntoIterator<Item = String>,
        pacing: PlannerPacing,
    ) -> Self {
        Self {
            fetcher,
            catalog,
            committer,
            root,
            class_filter: class_filter.into_iter().collect(),
            pacing,
            state: PlannerState::AtSection,
        }
    }

    pub fn state(&self) -> PlannerState {
        self.state
    }

    fn enter(&mut self, state: PlannerState) {
        if self.state != state {
            tracing::trace!("Planner {} -> {}", self.state, state);
            self.state = state;
        }
    }

    /// Fetches a catalog page, re-trying pages that come back empty
    async fn fetch_catalog_page(&self, url: &Url, ctx: &FetchContext) -> Result<Document, String> {
        let mut attempt = 1;
        loop {
            match self.fetcher.fetch(url, ctx).await {
                FetchResult::Success(doc) => return Ok(doc),
                FetchResult::Fatal { reason } => return Err(reason),
                FetchResult::Retryable { reason, .. } => {
                    if attempt >= self.pacing.empty_retries || self.committer.is_cancelled() {
                        return Err(reason);
                    }
                    self.fetcher
                        .pacer()
                        .pause(PauseKind::EmptyRetry, self.pacing.empty_retry_delay * attempt)
                        .await;
                    attempt += 1;
                }
            }
        }
    }

    fn listing_context(&self) -> FetchContext {
        match self.catalog.listing_marker() {
            Some(marker) => FetchContext::expecting(marker),
            None => FetchContext::default(),
        }
    }

    /// True when `doc` looks like a fully rendered listing page
    fn has_listing(&self, doc: &Document) -> bool {
        self.catalog
            .listing_marker()
            .map_or(true, |marker| doc.body.contains(marker))
    }

    async fn pause(&self, kind: PauseKind, min_ms: u64, max_ms: u64) {
        self.fetcher
            .pacer()
            .pause(kind, random_between(min_ms, max_ms))
            .await;
    }

    /// Fetches and parses the section list
    pub async fn sections(&self) -> crate::Result<Vec<SectionEntry>> {
        let doc = self
            .fetch_catalog_page(&self.root, &FetchContext::default())
            .await
            .map_err(|reason| KvedError::CatalogUnavailable {
                url: self.root.to_string(),
                reason,
            })?;

        self.catalog
            .sections(&doc)
            .map_err(|e| KvedError::CatalogUnavailable {
                url: self.root.to_string(),
                reason: e.to_string(),
            })
    }

    /// Walks the whole catalog, resuming after `resume` when given
    ///
    /// The checkpointed page itself is processed again.
    pub async fn run(
        &mut self,
        queue: &WorkQueue,
        resume: Option<CrawlPosition>,
    ) -> crate::Result<PlanOutcome> {
        let mut cursor = ResumeCursor::new(resume);
        if let Some(target) = cursor.target() {
            tracing::info!("Resuming from checkpoint at {}", target);
        }

        self.enter(PlannerState::AtSection);
        let sections = match self.sections().await {
            Ok(sections) => sections,
            Err(_) if self.committer.is_cancelled() => return Ok(PlanOutcome::Interrupted),
            Err(e) => return Err(e),
        };
        tracing::info!("Catalog has {} sections", sections.len());

        for section in &sections {
            if cursor.skip_section(&section.code) {
                tracing::debug!("Skipping section {} (before checkpoint)", section.code);
                continue;
            }
            self.enter(PlannerState::AtSection);

            for chapter in &section.chapters {
                if self.committer.is_cancelled() {
                    return Ok(PlanOutcome::Interrupted);
                }
                if cursor.skip_chapter(&chapter.code) {
                    tracing::debug!("Skipping chapter {} (before checkpoint)", chapter.code);
                    continue;
                }
                self.enter(PlannerState::AtChapter);

                let chapter_url = match self.catalog.chapter_url(&self.root, &chapter.code) {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::warn!("Skipping chapter {}: {}", chapter.code, e);
                        self.committer.stats().unit_skipped();
                        continue;
                    }
                };

                let rows = match self
                    .fetch_catalog_page(&chapter_url, &FetchContext::default())
                    .await
                {
                    Ok(doc) => self.catalog.chapter_rows(&doc).map_err(|e| e.to_string()),
                    Err(reason) => Err(reason),
                };
                let rows = match rows {
                    Ok(rows) => rows,
                    Err(reason) => {
                        if self.committer.is_cancelled() {
                            return Ok(PlanOutcome::Interrupted);
                        }
                        tracing::warn!(url = %chapter_url, "Skipping chapter {}: {}", chapter.code, reason);
                        self.committer.stats().unit_skipped();
                        continue;
                    }
                };

                let mut group: Option<(String, String)> = None;
                for row in rows {
                    let (class_code, class_name) = match row {
                        ChapterRow::Group { code, name } => {
                            self.enter(PlannerState::AtGroup);
                            group = Some((code, name));
                            continue;
                        }
                        ChapterRow::Class { code, name } => (code, name),
                    };

                    let Some((group_code, group_name)) = &group else {
                        tracing::debug!("Class {} listed before any group, ignoring", class_code);
                        continue;
                    };
                    if cursor.skip_group(group_code) || cursor.skip_class(&class_code) {
                        continue;
                    }
                    if !self.class_filter.is_empty() && !self.class_filter.contains(&class_code) {
                        continue;
                    }

                    self.enter(PlannerState::AtClass);
                    let first_page = cursor.enter_class(&class_code);
                    let context = HierarchyContext {
                        section_code: section.code.clone(),
                        section_name: section.name.clone(),
                        chapter_code: chapter.code.clone(),
                        chapter_name: chapter.name.clone(),
                        group_code: group_code.clone(),
                        group_name: group_name.clone(),
                        class_code,
                        class_name,
                        page_number: first_page,
                    };

                    match self.crawl_class(queue, &chapter_url, &context, first_page).await? {
                        ClassOutcome::Interrupted => return Ok(PlanOutcome::Interrupted),
                        ClassOutcome::Skipped => {}
                        ClassOutcome::Done => {
                            self.pause(
                                PauseKind::Class,
                                self.pacing.class_pause_min_ms,
                                self.pacing.class_pause_max_ms,
                            )
                            .await;
                        }
                    }
                }
            }
        }

        self.enter(PlannerState::Done);
        tracing::info!("Catalog traversal complete");
        Ok(PlanOutcome::Completed)
    }

    /// Processes the pages of one class from `first_page` on
    async fn crawl_class(
        &mut self,
        queue: &WorkQueue,
        chapter_url: &Url,
        context: &HierarchyContext,
        first_page: u32,
    ) -> crate::Result<ClassOutcome> {
        let class_code = &context.class_code;
        let class_url = match self.catalog.class_url(chapter_url, class_code) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("Skipping class {}: {}", class_code, e);
                self.committer.stats().unit_skipped();
                return Ok(ClassOutcome::Skipped);
            }
        };

        // Page 1 is reused from here when it already carries the listing
        let landing = match self
            .fetch_catalog_page(&class_url, &FetchContext::default())
            .await
        {
            Ok(doc) => doc,
            Err(reason) => {
                if self.committer.is_cancelled() {
                    return Ok(ClassOutcome::Interrupted);
                }
                tracing::warn!(url = %class_url, "Skipping class {}: {}", class_code, reason);
                self.committer.stats().unit_skipped();
                return Ok(ClassOutcome::Skipped);
            }
        };

        let pages = self.catalog.page_count(&landing);
        tracing::info!(class_code = %class_code, "Class {} has {} pages", class_code, pages);
        if first_page > pages {
            tracing::warn!(
                class_code = %class_code,
                "Checkpoint page {} is past the last page {}",
                first_page,
                pages
            );
        }

        let listing_ctx = self.listing_context();
        let mut landing = Some(landing);
        for page in first_page..=pages {
            if self.committer.is_cancelled() {
                return Ok(ClassOutcome::Interrupted);
            }
            self.enter(PlannerState::AtPage);

            let reusable = landing
                .take()
                .filter(|doc| page == 1 && self.has_listing(doc));
            let page_doc = match reusable {
                Some(doc) => doc,
                None => {
                    let page_url = self.catalog.page_url(&class_url, page);
                    match self.fetch_catalog_page(&page_url, &listing_ctx).await {
                        Ok(doc) => doc,
                        Err(reason) => {
                            if self.committer.is_cancelled() {
                                return Ok(ClassOutcome::Interrupted);
                            }
                            tracing::warn!(
                                url = %page_url,
                                class_code = %class_code,
                                page,
                                "Skipping listing page: {}",
                                reason
                            );
                            self.committer.stats().unit_skipped();
                            continue;
                        }
                    }
                }
            };

            let page_context = context.at_page(page);
            let jobs: Vec<DetailJob> = self
                .catalog
                .listing_links(&page_doc)
                .into_iter()
                .map(|link| DetailJob::new(link.url, link.identifier, page_context.clone()))
                .collect();
            if jobs.is_empty() {
                tracing::warn!(class_code = %class_code, page, "Listing page has no companies");
            } else {
                tracing::debug!(class_code = %class_code, page, "Found {} companies", jobs.len());
            }

            match self
                .committer
                .commit(queue, jobs, &page_context.position())
                .await?
            {
                UnitOutcome::Interrupted(_) => return Ok(ClassOutcome::Interrupted),
                UnitOutcome::Committed(_) => {}
            }

            if page < pages {
                self.pause(
                    PauseKind::Page,
                    self.pacing.page_pause_min_ms,
                    self.pacing.page_pause_max_ms,
                )
                .await;
            }
        }

        Ok(ClassOutcome::Done)
    }
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("root", &self.root.as_str())
            .field("state", &self.state)
            .field("class_filter", &self.class_filter)
            .finish()
    }
}

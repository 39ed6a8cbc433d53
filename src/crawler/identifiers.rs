//! Identifier-list planner
//!
//! Instead of walking the catalog, reads company identifiers from a CSV
//! column and fetches each company's page directly. Identifiers are grouped
//! into fixed-size chunks; a chunk plays the role of a listing page and is
//! checkpointed as `{class_code: <input label>, page: <chunk number>}`.

use crate::crawler::pacer::{random_between, PauseKind};
use crate::crawler::unit::{PlanOutcome, UnitCommitter, UnitOutcome};
use crate::crawler::workers::WorkQueue;
use crate::crawler::FetchClient;
use crate::state::{CrawlPosition, DetailJob, HierarchyContext};
use crate::KvedError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Reads the non-empty values of one CSV column, dropping duplicates
pub fn read_identifiers(path: &Path, column: &str) -> crate::Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    let index = headers
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| {
            KvedError::Input(format!(
                "column {:?} not found in {}",
                column,
                path.display()
            ))
        })?;

    let mut seen = HashSet::new();
    let mut identifiers = Vec::new();
    for row in reader.records() {
        let row = row?;
        let Some(value) = row.get(index).map(str::trim) else {
            continue;
        };
        if value.is_empty() || !seen.insert(value.to_string()) {
            continue;
        }
        identifiers.push(value.to_string());
    }
    Ok(identifiers)
}

/// Builds a detail URL by substituting `{id}` in `template`
pub fn detail_url(template: &str, identifier: &str) -> Result<Url, url::ParseError> {
    Url::parse(&template.replace("{id}", identifier))
}

/// Label used as the class code of identifier-list units
pub fn input_label(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "identifiers".to_string())
}

pub struct IdentifierPlanner {
    fetcher: Arc<FetchClient>,
    committer: UnitCommitter,
    csv_path: PathBuf,
    column: String,
    template: String,
    chunk_size: usize,
    label: String,
    chunk_pause_min_ms: u64,
    chunk_pause_max_ms: u64,
}

impl IdentifierPlanner {
    pub fn new(
        fetcher: Arc<FetchClient>,
        committer: UnitCommitter,
        csv_path: impl Into<PathBuf>,
        column: impl Into<String>,
        template: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        let csv_path = csv_path.into();
        Self {
            label: input_label(&csv_path),
            fetcher,
            committer,
            csv_path,
            column: column.into(),
            template: template.into(),
            chunk_size: chunk_size.max(1),
            chunk_pause_min_ms: 0,
            chunk_pause_max_ms: 0,
        }
    }

    /// Pause range between chunks
    pub fn with_chunk_pause(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.chunk_pause_min_ms = min_ms;
        self.chunk_pause_max_ms = max_ms;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// First chunk to process given a checkpoint
    fn first_chunk(&self, resume: Option<&CrawlPosition>) -> u32 {
        match resume {
            Some(position) if position.class_code == self.label => {
                tracing::info!("Resuming {} at chunk {}", self.label, position.page_number);
                position.page_number.max(1)
            }
            Some(position) => {
                tracing::warn!(
                    "Checkpoint {} belongs to another input, starting {} from the beginning",
                    position,
                    self.label
                );
                1
            }
            None => 1,
        }
    }

    pub async fn run(
        &mut self,
        queue: &WorkQueue,
        resume: Option<CrawlPosition>,
    ) -> crate::Result<PlanOutcome> {
        let identifiers = read_identifiers(&self.csv_path, &self.column)?;
        let chunks: Vec<&[String]> = identifiers.chunks(self.chunk_size).collect();
        let first = self.first_chunk(resume.as_ref());
        tracing::info!(
            "Loaded {} identifiers from {} ({} chunks)",
            identifiers.len(),
            self.csv_path.display(),
            chunks.len()
        );

        for (index, chunk) in chunks.iter().enumerate() {
            let number = index as u32 + 1;
            if number < first {
                continue;
            }
            if self.committer.is_cancelled() {
                return Ok(PlanOutcome::Interrupted);
            }

            let context = HierarchyContext {
                class_code: self.label.clone(),
                class_name: self.csv_path.display().to_string(),
                page_number: number,
                ..HierarchyContext::default()
            };

            let mut jobs = Vec::with_capacity(chunk.len());
            for identifier in chunk.iter() {
                match detail_url(&self.template, identifier) {
                    Ok(url) => jobs.push(DetailJob::new(url, identifier.as_str(), context.clone())),
                    Err(e) => {
                        tracing::warn!("Dropping identifier {:?}: {}", identifier, e);
                        self.committer.stats().job_dropped();
                    }
                }
            }

            match self
                .committer
                .commit(queue, jobs, &context.position())
                .await?
            {
                UnitOutcome::Interrupted(_) => return Ok(PlanOutcome::Interrupted),
                UnitOutcome::Committed(_) => {}
            }

            if index + 1 < chunks.len() {
                self.fetcher
                    .pacer()
                    .pause(
                        PauseKind::Page,
                        random_between(self.chunk_pause_min_ms, self.chunk_pause_max_ms),
                    )
                    .await;
            }
        }

        tracing::info!("Identifier list {} complete", self.label);
        Ok(PlanOutcome::Completed)
    }
}

impl std::fmt::Debug for IdentifierPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierPlanner")
            .field("csv_path", &self.csv_path)
            .field("column", &self.column)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

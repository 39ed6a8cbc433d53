//! Storage traits and error types
//!
//! This module defines the trait interfaces for the checkpoint store and the
//! record writers, plus the associated error types.

use crate::state::{CrawlPosition, ParsedRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),

    #[error("Background write task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::Task(e.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable snapshot of crawl progress
///
/// Serialized flat so the file reads as
/// `{"section_code": .., "class_code": .., "page": .., "timestamp": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    #[serde(flatten)]
    pub position: CrawlPosition,

    pub timestamp: DateTime<Utc>,

    /// Hash of the configuration the checkpoint was written under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,
}

impl CheckpointRecord {
    pub fn new(position: CrawlPosition, config_hash: Option<String>) -> Self {
        Self {
            position,
            timestamp: Utc::now(),
            config_hash,
        }
    }
}

/// Persists the last fully processed traversal unit
///
/// Implementations must make `save` durable before returning so that a crash
/// never leaves a partially written checkpoint behind.
pub trait CheckpointStore: Send + Sync {
    /// Returns `None` for a missing or unreadable checkpoint
    fn load(&self) -> Option<CheckpointRecord>;

    fn save(&self, record: &CheckpointRecord) -> StorageResult<()>;

    /// Removes the checkpoint so the next run starts from the beginning
    fn clear(&self) -> StorageResult<()>;
}

/// Writes batches of records to durable storage
pub trait RecordWriter: Send {
    /// Writes every record and returns how many were written
    ///
    /// Data must be on disk when this returns.
    fn write_batch(&mut self, records: &[ParsedRecord]) -> StorageResult<usize>;
}

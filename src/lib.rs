//! KVED-Crawl: a resumable crawler for company-registry catalogs
//!
//! This crate walks a hierarchical business catalog (section → chapter →
//! group → class → paginated listing → company page), fetching company
//! detail pages through a bounded worker pool. Progress is checkpointed per
//! listing page so a multi-day crawl can resume after a crash, and parsed
//! records are flushed in batches before every checkpoint advance.

pub mod config;
pub mod crawler;
pub mod output;
pub mod session;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for KVED-Crawl operations
///
/// Only structural failures are reported through this type. A single
/// company page failing to download or parse is never an `Err`; it is
/// logged and skipped by the worker pool.
#[derive(Debug, Error)]
pub enum KvedError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Catalog root unavailable at {url}: {reason}")]
    CatalogUnavailable { url: String, reason: String },

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Invalid identifier input: {0}")]
    Input(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Errors raised by the pluggable page parsers
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Expected element missing: {0}")]
    Missing(String),

    #[error("Malformed page structure: {0}")]
    Malformed(String),

    #[error("Invalid selector: {0}")]
    Selector(String),
}

/// Result type alias for KVED-Crawl operations
pub type Result<T> = std::result::Result<T, KvedError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for parser operations
pub type ParseResult<T> = std::result::Result<T, ParseError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{run_crawl, CrawlOptions, FetchClient, FetchResult};
pub use state::{CrawlPosition, DetailJob, FieldValue, HierarchyContext, ParsedRecord};

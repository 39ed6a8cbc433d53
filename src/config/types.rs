use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for KVED-Crawl
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    pub source: SourceConfig,
    pub output: OutputConfig,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrawlerConfig {
    /// Number of concurrent detail-page workers
    pub concurrency: usize,

    /// Capacity of the detail job queue; the planner blocks when it is full
    pub queue_capacity: usize,

    /// Physical attempts per logical fetch
    pub max_attempts: u32,

    /// How many times a detail job may be re-queued after a retryable outcome
    pub detail_retry_limit: u32,

    /// Politeness delay range applied before every physical request (milliseconds)
    pub politeness_min_ms: u64,
    pub politeness_max_ms: u64,

    /// First backoff delay for transient failures (milliseconds)
    pub backoff_base_ms: u64,

    /// Ceiling for the exponential backoff (seconds)
    pub backoff_cap_secs: u64,

    /// Random extra fraction of the backoff delay, in `0.0..=1.0`
    pub backoff_jitter: f64,

    /// Cooldown after a block or challenge page (seconds)
    pub block_cooldown_secs: u64,

    /// What to do on an unexpected HTTP status
    pub unexpected_status: UnexpectedStatusPolicy,

    /// Sleep used by the `sleep-and-reset` policy (seconds)
    pub unexpected_status_sleep_secs: u64,

    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,

    /// Base delay before re-trying an empty detail page; grows with each attempt
    pub empty_retry_delay_ms: u64,

    /// Pause range between listing pages (milliseconds)
    pub page_pause_min_ms: u64,
    pub page_pause_max_ms: u64,

    /// Pause range between classes (milliseconds)
    pub class_pause_min_ms: u64,
    pub class_pause_max_ms: u64,

    /// Probability of an extra "reading" pause after a detail page
    pub reading_pause_probability: f64,
    pub reading_pause_min_ms: u64,
    pub reading_pause_max_ms: u64,

    /// Delay before the outer loop restarts a failed run (seconds)
    pub restart_delay_secs: u64,

    /// Maximum number of restarts; 0 means unlimited
    pub max_restarts: u32,

    /// Log a progress line every N completed traversal units
    pub progress_every: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            queue_capacity: 32,
            max_attempts: 5,
            detail_retry_limit: 3,
            politeness_min_ms: 1500,
            politeness_max_ms: 3500,
            backoff_base_ms: 2000,
            backoff_cap_secs: 120,
            backoff_jitter: 0.5,
            block_cooldown_secs: 1800,
            unexpected_status: UnexpectedStatusPolicy::Fatal,
            unexpected_status_sleep_secs: 7200,
            request_timeout_secs: 40,
            connect_timeout_secs: 10,
            empty_retry_delay_ms: 5000,
            page_pause_min_ms: 10_000,
            page_pause_max_ms: 20_000,
            class_pause_min_ms: 15_000,
            class_pause_max_ms: 25_000,
            reading_pause_probability: 0.2,
            reading_pause_min_ms: 2000,
            reading_pause_max_ms: 6000,
            restart_delay_secs: 60,
            max_restarts: 0,
            progress_every: 10,
        }
    }
}

impl CrawlerConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }

    pub fn block_cooldown(&self) -> Duration {
        Duration::from_secs(self.block_cooldown_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }
}

/// Policy for HTTP statuses that are neither success, transient, nor a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnexpectedStatusPolicy {
    /// Give up on the URL immediately
    Fatal,
    /// Sleep for a long time, reset the identity, and try again
    SleepAndReset,
}

/// Browser identity pool and rotation settings
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct IdentityConfig {
    pub user_agents: Vec<String>,
    pub accept_languages: Vec<String>,
    pub referers: Vec<String>,

    /// Rotate the identity after this many requests
    pub rotate_every: u64,

    /// Size of the sliding request window used for proactive rotation
    pub block_window: usize,

    /// Transient or block signals inside the window that trigger rotation
    pub block_threshold: usize,

    /// Body substrings that identify a challenge page
    pub challenge_markers: Vec<String>,

    /// Cookies (`name=value`) seeded into the first session
    pub cookies: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:123.0) Gecko/20100101 Firefox/123.0".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_2) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.3 Safari/605.1.15".to_string(),
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            ],
            accept_languages: vec![
                "uk-UA,uk;q=0.9,en-US;q=0.8,en;q=0.7".to_string(),
                "en-US,en;q=0.9".to_string(),
            ],
            referers: vec![
                "https://www.google.com/".to_string(),
                "https://www.bing.com/".to_string(),
            ],
            rotate_every: 80,
            block_window: 20,
            block_threshold: 4,
            challenge_markers: vec![
                "Checking your browser".to_string(),
                "cf-browser-verification".to_string(),
                "cf-challenge".to_string(),
            ],
            cookies: Vec::new(),
        }
    }
}

/// Where detail jobs come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceMode {
    /// Walk the catalog hierarchy from `root-url`
    Catalog,
    /// Read identifiers from a CSV file and build detail URLs from a template
    Identifiers,
}

/// Input source configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SourceConfig {
    pub mode: SourceMode,

    /// Catalog root (section list) URL
    #[serde(default)]
    pub root_url: Option<String>,

    /// Only crawl these class codes (empty means all)
    #[serde(default)]
    pub class_filter: Vec<String>,

    #[serde(default)]
    pub identifiers_csv: Option<PathBuf>,

    #[serde(default = "default_identifier_column")]
    pub identifier_column: String,

    /// Detail URL template; `{id}` is replaced by the identifier
    #[serde(default)]
    pub detail_url_template: Option<String>,

    /// Identifiers per checkpointed unit
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Optional substring every detail page must contain
    #[serde(default)]
    pub detail_marker: Option<String>,
}

fn default_identifier_column() -> String {
    "IDENTIFYCODE".to_string()
}

fn default_chunk_size() -> usize {
    50
}

/// Output record format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// One CSV file per flushed batch
    Csv,
    /// One append-only JSON-lines file per class
    Jsonl,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    /// Directory receiving the batch files
    pub directory: PathBuf,

    /// Path of the JSON checkpoint file
    pub checkpoint_path: PathBuf,

    #[serde(default = "default_format")]
    pub format: OutputFormat,

    /// Records buffered before a batch is written
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

fn default_format() -> OutputFormat {
    OutputFormat::Csv
}

fn default_batch_size() -> usize {
    50
}

fn default_file_prefix() -> String {
    "kved".to_string()
}

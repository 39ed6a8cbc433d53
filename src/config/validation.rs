use crate::config::types::{
    Config, CrawlerConfig, IdentityConfig, OutputConfig, SourceConfig, SourceMode,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_identity_config(&config.identity)?;
    validate_source_config(&config.source)?;
    validate_output_config(&config.output)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 64 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 64, got {}",
            config.concurrency
        )));
    }

    if config.queue_capacity < 1 {
        return Err(ConfigError::Validation(
            "queue-capacity must be >= 1".to_string(),
        ));
    }

    if config.max_attempts < 1 || config.max_attempts > 20 {
        return Err(ConfigError::Validation(format!(
            "max-attempts must be between 1 and 20, got {}",
            config.max_attempts
        )));
    }

    validate_range(
        "politeness",
        config.politeness_min_ms,
        config.politeness_max_ms,
    )?;
    validate_range(
        "page-pause",
        config.page_pause_min_ms,
        config.page_pause_max_ms,
    )?;
    validate_range(
        "class-pause",
        config.class_pause_min_ms,
        config.class_pause_max_ms,
    )?;
    validate_range(
        "reading-pause",
        config.reading_pause_min_ms,
        config.reading_pause_max_ms,
    )?;

    if config.backoff_base_ms == 0 {
        return Err(ConfigError::Validation(
            "backoff-base-ms must be > 0".to_string(),
        ));
    }

    if config.backoff_base_ms > config.backoff_cap_secs.saturating_mul(1000) {
        return Err(ConfigError::Validation(format!(
            "backoff-base-ms ({}) exceeds backoff-cap-secs ({})",
            config.backoff_base_ms, config.backoff_cap_secs
        )));
    }

    if !(0.0..=1.0).contains(&config.backoff_jitter) {
        return Err(ConfigError::Validation(format!(
            "backoff-jitter must be within 0.0..=1.0, got {}",
            config.backoff_jitter
        )));
    }

    if !(0.0..=1.0).contains(&config.reading_pause_probability) {
        return Err(ConfigError::Validation(format!(
            "reading-pause-probability must be within 0.0..=1.0, got {}",
            config.reading_pause_probability
        )));
    }

    if config.progress_every == 0 {
        return Err(ConfigError::Validation(
            "progress-every must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_range(name: &str, min: u64, max: u64) -> Result<(), ConfigError> {
    if min > max {
        return Err(ConfigError::Validation(format!(
            "{}-min-ms ({}) must not exceed {}-max-ms ({})",
            name, min, name, max
        )));
    }
    Ok(())
}

/// Validates the identity pool
fn validate_identity_config(config: &IdentityConfig) -> Result<(), ConfigError> {
    // Rotation must be able to change the user agent
    if config.user_agents.len() < 2 {
        return Err(ConfigError::Validation(format!(
            "at least two user-agents are required, got {}",
            config.user_agents.len()
        )));
    }

    if config.user_agents.iter().any(|ua| ua.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "user-agents cannot contain empty entries".to_string(),
        ));
    }

    if config.rotate_every == 0 {
        return Err(ConfigError::Validation(
            "rotate-every must be >= 1".to_string(),
        ));
    }

    if config.block_threshold == 0 || config.block_threshold > config.block_window {
        return Err(ConfigError::Validation(format!(
            "block-threshold must be between 1 and block-window ({}), got {}",
            config.block_window, config.block_threshold
        )));
    }

    for cookie in &config.cookies {
        match cookie.split_once('=') {
            Some((name, _)) if !name.trim().is_empty() => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "cookie '{}' must have the form name=value",
                    cookie
                )))
            }
        }
    }

    Ok(())
}

/// Validates the job source
fn validate_source_config(config: &SourceConfig) -> Result<(), ConfigError> {
    match config.mode {
        SourceMode::Catalog => {
            let root = config.root_url.as_deref().ok_or_else(|| {
                ConfigError::Validation("catalog mode requires root-url".to_string())
            })?;
            validate_http_url(root)?;
        }
        SourceMode::Identifiers => {
            if config.identifiers_csv.is_none() {
                return Err(ConfigError::Validation(
                    "identifiers mode requires identifiers-csv".to_string(),
                ));
            }

            let template = config.detail_url_template.as_deref().ok_or_else(|| {
                ConfigError::Validation("identifiers mode requires detail-url-template".to_string())
            })?;

            if !template.contains("{id}") {
                return Err(ConfigError::Validation(format!(
                    "detail-url-template '{}' must contain the {{id}} placeholder",
                    template
                )));
            }
            validate_http_url(&template.replace("{id}", "0"))?;

            if config.identifier_column.is_empty() {
                return Err(ConfigError::Validation(
                    "identifier-column cannot be empty".to_string(),
                ));
            }

            if config.chunk_size == 0 {
                return Err(ConfigError::Validation(
                    "chunk-size must be >= 1".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_http_url(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid URL '{}': {}", raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl(format!(
            "URL '{}' must use http or https",
            raw
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.directory.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "output directory cannot be empty".to_string(),
        ));
    }

    if config.checkpoint_path.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "checkpoint-path cannot be empty".to_string(),
        ));
    }

    if config.batch_size == 0 {
        return Err(ConfigError::Validation(
            "batch-size must be >= 1".to_string(),
        ));
    }

    if config.file_prefix.is_empty()
        || !config
            .file_prefix
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ConfigError::Validation(format!(
            "file-prefix must be non-empty and contain only alphanumerics, '-' or '_', got '{}'",
            config.file_prefix
        )));
    }

    Ok(())
}

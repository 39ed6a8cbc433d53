//! KVED-Crawl main entry point
//!
//! This is the command-line interface for the KVED-Crawl catalog crawler.

use anyhow::Context;
use clap::Parser;
use kved_crawl::config::{load_config_with_hash, Config, SourceMode};
use kved_crawl::crawler::{read_identifiers, CrawlReport, PlanOutcome};
use kved_crawl::output::print_statistics;
use kved_crawl::storage::{CheckpointStore, JsonCheckpointStore};
use kved_crawl::{run_crawl, CrawlOptions};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// KVED-Crawl: a resumable company catalog crawler
///
/// KVED-Crawl walks a hierarchical business catalog (or a list of company
/// identifiers), fetches every company page through a bounded worker pool,
/// and checkpoints after each listing page so an interrupted run picks up
/// where it stopped.
#[derive(Parser, Debug)]
#[command(name = "kved-crawl")]
#[command(version = "1.0.0")]
#[command(about = "A resumable company catalog crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Delete the checkpoint and start from the beginning
    #[arg(long)]
    fresh: bool,

    /// Validate config and show what would be crawled without crawling
    #[arg(long, conflicts_with_all = ["show_checkpoint", "fresh"])]
    dry_run: bool,

    /// Print the saved checkpoint and exit
    #[arg(long, conflicts_with_all = ["dry_run", "fresh"])]
    show_checkpoint: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.show_checkpoint {
        handle_show_checkpoint(&config, &config_hash)
    } else {
        handle_crawl(config, config_hash, cli.fresh).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("kved_crawl=info,warn"),
            1 => EnvFilter::new("kved_crawl=debug,info"),
            2 => EnvFilter::new("kved_crawl=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows the crawl plan
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== KVED-Crawl Dry Run ===\n");

    println!("Crawler Configuration:");
    println!(
        "  Workers: {} (queue capacity {})",
        config.crawler.concurrency, config.crawler.queue_capacity
    );
    println!("  Max attempts per request: {}", config.crawler.max_attempts);
    println!(
        "  Politeness delay: {}-{}ms",
        config.crawler.politeness_min_ms, config.crawler.politeness_max_ms
    );
    println!(
        "  Backoff: base {}ms, cap {}s, jitter {:.2}",
        config.crawler.backoff_base_ms,
        config.crawler.backoff_cap_secs,
        config.crawler.backoff_jitter
    );
    println!("  Block cooldown: {}s", config.crawler.block_cooldown_secs);
    println!(
        "  Restarts: {} (delay {}s)",
        if config.crawler.max_restarts == 0 {
            "unlimited".to_string()
        } else {
            config.crawler.max_restarts.to_string()
        },
        config.crawler.restart_delay_secs
    );

    println!("\nIdentity:");
    println!("  User agents: {}", config.identity.user_agents.len());
    println!("  Rotate every: {} requests", config.identity.rotate_every);
    println!("  Seeded cookies: {}", config.identity.cookies.len());

    println!("\nSource:");
    match config.source.mode {
        SourceMode::Catalog => {
            println!("  Mode: catalog");
            println!(
                "  Root: {}",
                config.source.root_url.as_deref().unwrap_or("(missing)")
            );
            if config.source.class_filter.is_empty() {
                println!("  Classes: all");
            } else {
                println!("  Classes: {}", config.source.class_filter.join(", "));
            }
        }
        SourceMode::Identifiers => {
            println!("  Mode: identifiers");
            if let Some(path) = &config.source.identifiers_csv {
                let ids = read_identifiers(path, &config.source.identifier_column)?;
                let chunk_size = config.source.chunk_size.max(1);
                println!(
                    "  Input: {} ({} identifiers in {} chunks)",
                    path.display(),
                    ids.len(),
                    ids.len().div_ceil(chunk_size)
                );
            }
            println!(
                "  Template: {}",
                config
                    .source
                    .detail_url_template
                    .as_deref()
                    .unwrap_or("(missing)")
            );
        }
    }

    println!("\nOutput:");
    println!("  Directory: {}", config.output.directory.display());
    println!("  Format: {:?}", config.output.format);
    println!("  Batch size: {}", config.output.batch_size);
    println!("  Checkpoint: {}", config.output.checkpoint_path.display());

    let store = JsonCheckpointStore::new(&config.output.checkpoint_path);
    match store.load() {
        Some(record) => println!("\n✓ Would resume from {}", record.position),
        None => println!("\n✓ Would start from the beginning"),
    }
    println!("✓ Configuration is valid");

    Ok(())
}

/// Handles the --show-checkpoint mode
fn handle_show_checkpoint(config: &Config, config_hash: &str) -> anyhow::Result<()> {
    let store = JsonCheckpointStore::new(&config.output.checkpoint_path);
    println!("Checkpoint: {}\n", store.path().display());

    let Some(record) = store.load() else {
        println!("No checkpoint saved");
        return Ok(());
    };

    let position = &record.position;
    println!("  Section: {}", position.section_code);
    println!("  Chapter: {}", position.chapter_code);
    println!("  Group: {}", position.group_code);
    println!("  Class: {}", position.class_code);
    println!("  Page: {}", position.page_number);
    println!("  Saved: {}", record.timestamp);
    match &record.config_hash {
        Some(hash) if hash == config_hash => println!("  Config: unchanged"),
        Some(_) => println!("  Config: changed since this checkpoint"),
        None => println!("  Config: not recorded"),
    }

    Ok(())
}

/// Runs the crawl, restarting from the checkpoint after structural failures
async fn handle_crawl(config: Config, config_hash: String, fresh: bool) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight pages");
            signal_token.cancel();
        }
    });

    if fresh {
        tracing::info!("Starting fresh crawl (ignoring previous checkpoint)");
    } else {
        tracing::info!("Starting crawl (will resume from checkpoint if present)");
    }

    let mut options = CrawlOptions {
        fresh,
        config_hash: Some(config_hash),
    };
    let max_restarts = config.crawler.max_restarts;
    let mut restarts = 0u32;

    let report: CrawlReport = loop {
        match run_crawl(&config, &options, shutdown.clone()).await {
            Ok(report) => break report,
            Err(e) if shutdown.is_cancelled() => {
                tracing::warn!("Crawl stopped during shutdown: {}", e);
                return Ok(());
            }
            Err(e) => {
                restarts += 1;
                if max_restarts != 0 && restarts > max_restarts {
                    tracing::error!("Crawl failed after {} restarts: {}", max_restarts, e);
                    return Err(e.into());
                }

                let delay = config.crawler.restart_delay();
                tracing::error!(
                    "Crawl failed: {}; restarting from checkpoint in {}s (restart {})",
                    e,
                    delay.as_secs(),
                    restarts
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return Ok(()),
                }
                // A restart always resumes
                options.fresh = false;
            }
        }
    };

    print_statistics(&report.stats);
    match report.outcome {
        PlanOutcome::Completed => tracing::info!("Crawl completed successfully"),
        PlanOutcome::Interrupted => tracing::info!("Crawl interrupted; rerun to resume"),
    }

    Ok(())
}

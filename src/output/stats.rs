//! Crawl statistics
//!
//! Counters are shared by the planner and every worker, so they are plain
//! atomics. A `StatisticsSnapshot` freezes them for reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Live counters for one crawl run
#[derive(Debug)]
pub struct CrawlStatistics {
    started: Instant,
    units_completed: AtomicU64,
    units_skipped: AtomicU64,
    jobs_dispatched: AtomicU64,
    records_stored: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_dropped: AtomicU64,
    jobs_interrupted: AtomicU64,
    parse_failures: AtomicU64,
}

impl Default for CrawlStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlStatistics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            units_completed: AtomicU64::new(0),
            units_skipped: AtomicU64::new(0),
            jobs_dispatched: AtomicU64::new(0),
            records_stored: AtomicU64::new(0),
            jobs_retried: AtomicU64::new(0),
            jobs_dropped: AtomicU64::new(0),
            jobs_interrupted: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
        }
    }

    /// Records a completed traversal unit and returns the new total
    pub fn unit_completed(&self) -> u64 {
        self.units_completed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// A catalog subtree or unit skipped after a fatal fetch
    pub fn unit_skipped(&self) {
        self.units_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_dispatched(&self) {
        self.jobs_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self) {
        self.records_stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_retried(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_dropped(&self) {
        self.jobs_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_interrupted(&self) {
        self.jobs_interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn parse_failed(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn snapshot(&self, rotations: u64, requests: u64) -> StatisticsSnapshot {
        StatisticsSnapshot {
            elapsed: self.elapsed(),
            units_completed: self.units_completed.load(Ordering::Relaxed),
            units_skipped: self.units_skipped.load(Ordering::Relaxed),
            jobs_dispatched: self.jobs_dispatched.load(Ordering::Relaxed),
            records_stored: self.records_stored.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_dropped: self.jobs_dropped.load(Ordering::Relaxed),
            jobs_interrupted: self.jobs_interrupted.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            requests,
            rotations,
        }
    }

    /// Logs one progress line
    pub fn log_progress(&self) {
        let snapshot = self.snapshot(0, 0);
        tracing::info!(
            units = snapshot.units_completed,
            records = snapshot.records_stored,
            dispatched = snapshot.jobs_dispatched,
            dropped = snapshot.jobs_dropped,
            "Progress: {} units, {} records ({:.0}/hour)",
            snapshot.units_completed,
            snapshot.records_stored,
            snapshot.records_per_hour()
        );
    }
}

/// Frozen copy of the counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatisticsSnapshot {
    pub elapsed: Duration,
    pub units_completed: u64,
    pub units_skipped: u64,
    pub jobs_dispatched: u64,
    pub records_stored: u64,
    pub jobs_retried: u64,
    pub jobs_dropped: u64,
    pub jobs_interrupted: u64,
    pub parse_failures: u64,
    pub requests: u64,
    pub rotations: u64,
}

impl StatisticsSnapshot {
    pub fn records_per_hour(&self) -> f64 {
        let hours = self.elapsed.as_secs_f64() / 3600.0;
        if hours > 0.0 {
            self.records_stored as f64 / hours
        } else {
            0.0
        }
    }

    /// Share of dispatched jobs that produced a record, in percent
    pub fn success_rate(&self) -> f64 {
        if self.jobs_dispatched > 0 {
            (self.records_stored as f64 / self.jobs_dispatched as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &StatisticsSnapshot) {
    println!("=== Crawl Statistics ===\n");

    println!("Overview:");
    println!("  Elapsed: {}s", stats.elapsed.as_secs());
    println!("  Units completed: {}", stats.units_completed);
    println!("  Units skipped: {}", stats.units_skipped);
    println!("  HTTP requests: {}", stats.requests);
    println!("  Identity rotations: {}", stats.rotations);
    println!();

    println!("Detail Jobs:");
    println!("  Dispatched: {}", stats.jobs_dispatched);
    println!("  Stored: {}", stats.records_stored);
    println!("  Retried: {}", stats.jobs_retried);
    println!("  Dropped: {}", stats.jobs_dropped);
    if stats.parse_failures > 0 {
        println!("  Parse failures: {}", stats.parse_failures);
    }
    if stats.jobs_interrupted > 0 {
        println!("  Interrupted: {}", stats.jobs_interrupted);
    }
    println!();

    println!(
        "Success Rate: {:.1}% ({} / {} jobs, {:.0} records/hour)",
        stats.success_rate(),
        stats.records_stored,
        stats.jobs_dispatched,
        stats.records_per_hour()
    );
}

//! Output module for run reporting
//!
//! This module handles:
//! - Live crawl counters shared by the planner and workers
//! - Periodic progress lines
//! - The end-of-run statistics report

pub mod stats;

pub use stats::{print_statistics, CrawlStatistics, StatisticsSnapshot};

//! State module for the crawl data model
//!
//! # Components
//!
//! - `CrawlPosition`: a resumable point in the catalog traversal
//! - `ResumeCursor`: skips units strictly before a checkpointed position
//! - `HierarchyContext` / `DetailJob`: a company page waiting to be fetched
//! - `ParsedRecord` / `FieldValue`: a parsed company, ready for the sink
//! - `PlannerState`: where the catalog planner currently is

mod job;
mod position;
mod record;

use std::fmt;

// Re-export main types
pub use job::{DetailJob, HierarchyContext};
pub use position::{CrawlPosition, ResumeCursor};
pub use record::{FieldValue, ParsedRecord, IDENTIFIER_FIELD};

/// States of the hierarchical crawl planner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlannerState {
    AtSection,
    AtChapter,
    AtGroup,
    AtClass,
    AtPage,
    Done,
}

impl fmt::Display for PlannerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AtSection => "section",
            Self::AtChapter => "chapter",
            Self::AtGroup => "group",
            Self::AtClass => "class",
            Self::AtPage => "page",
            Self::Done => "done",
        };
        write!(f, "{}", s)
    }
}

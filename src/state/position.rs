//! Crawl positions and resume filtering
//!
//! A `CrawlPosition` names one listing page inside the catalog tree. Positions
//! order lexicographically over (section, chapter, group, class, page), which
//! matches the order the planner walks the catalog in.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A resumable point in the hierarchical traversal
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CrawlPosition {
    #[serde(default)]
    pub section_code: String,
    #[serde(default)]
    pub chapter_code: String,
    #[serde(default)]
    pub group_code: String,
    #[serde(default)]
    pub class_code: String,
    #[serde(rename = "page", alias = "page_number", default = "first_page")]
    pub page_number: u32,
}

fn first_page() -> u32 {
    1
}

impl CrawlPosition {
    pub fn new(
        section_code: impl Into<String>,
        chapter_code: impl Into<String>,
        group_code: impl Into<String>,
        class_code: impl Into<String>,
        page_number: u32,
    ) -> Self {
        Self {
            section_code: section_code.into(),
            chapter_code: chapter_code.into(),
            group_code: group_code.into(),
            class_code: class_code.into(),
            page_number,
        }
    }

    /// Position known only by class and page, as written by older checkpoints
    pub fn at_class(class_code: impl Into<String>, page_number: u32) -> Self {
        Self {
            class_code: class_code.into(),
            page_number,
            ..Self::default()
        }
    }
}

impl fmt::Display for CrawlPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{} page {}",
            self.section_code,
            self.chapter_code,
            self.group_code,
            self.class_code,
            self.page_number
        )
    }
}

/// Filter that skips every unit strictly before a checkpointed position
///
/// Levels whose checkpoint code is empty are never skipped, so a checkpoint
/// holding only a class code and page still resumes correctly: chapters are
/// walked but classes before the checkpointed one are skipped. Once the
/// planner reaches the checkpointed class (or anything after it) the cursor
/// disarms and the rest of the crawl proceeds normally.
#[derive(Debug, Clone, Default)]
pub struct ResumeCursor {
    target: Option<CrawlPosition>,
}

impl ResumeCursor {
    pub fn new(target: Option<CrawlPosition>) -> Self {
        Self { target }
    }

    /// Returns true while the checkpointed position has not been reached
    pub fn is_armed(&self) -> bool {
        self.target.is_some()
    }

    pub fn target(&self) -> Option<&CrawlPosition> {
        self.target.as_ref()
    }

    pub fn skip_section(&self, section_code: &str) -> bool {
        self.before(section_code, |t| &t.section_code)
    }

    pub fn skip_chapter(&self, chapter_code: &str) -> bool {
        self.before(chapter_code, |t| &t.chapter_code)
    }

    pub fn skip_group(&self, group_code: &str) -> bool {
        self.before(group_code, |t| &t.group_code)
    }

    pub fn skip_class(&self, class_code: &str) -> bool {
        self.before(class_code, |t| &t.class_code)
    }

    /// Enters a class and returns the first page to process in it
    ///
    /// Disarms the cursor when the class is the checkpointed one or lies
    /// after it. Callers must check `skip_class` first.
    pub fn enter_class(&mut self, class_code: &str) -> u32 {
        let page = match &self.target {
            Some(target) if target.class_code == class_code => target.page_number.max(1),
            _ => 1,
        };

        if self.target.is_some() {
            tracing::info!("Resuming at class {} page {}", class_code, page);
        }
        self.target = None;
        page
    }

    fn before(&self, code: &str, level: impl Fn(&CrawlPosition) -> &String) -> bool {
        match &self.target {
            Some(target) => {
                let checkpointed = level(target);
                !checkpointed.is_empty() && code < checkpointed.as_str()
            }
            None => false,
        }
    }
}

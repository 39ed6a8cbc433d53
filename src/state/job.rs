use crate::state::CrawlPosition;
use serde::{Deserialize, Serialize};
use url::Url;

/// Denormalized catalog metadata carried by every detail job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyContext {
    pub section_code: String,
    pub section_name: String,
    pub chapter_code: String,
    pub chapter_name: String,
    pub group_code: String,
    pub group_name: String,
    pub class_code: String,
    pub class_name: String,
    pub page_number: u32,
}

impl HierarchyContext {
    /// The listing page this context belongs to
    pub fn position(&self) -> CrawlPosition {
        CrawlPosition::new(
            self.section_code.clone(),
            self.chapter_code.clone(),
            self.group_code.clone(),
            self.class_code.clone(),
            self.page_number,
        )
    }

    /// Copy of this context pointing at another page of the same class
    pub fn at_page(&self, page_number: u32) -> Self {
        Self {
            page_number,
            ..self.clone()
        }
    }
}

/// A company detail page waiting to be fetched
///
/// Created by a planner when a listing page yields company links and
/// consumed exactly once by a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailJob {
    pub target_url: Url,
    pub company_identifier: String,
    pub context: HierarchyContext,
}

impl DetailJob {
    pub fn new(
        target_url: Url,
        company_identifier: impl Into<String>,
        context: HierarchyContext,
    ) -> Self {
        Self {
            target_url,
            company_identifier: company_identifier.into(),
            context,
        }
    }
}

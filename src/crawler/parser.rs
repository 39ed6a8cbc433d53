//! Site-specific page parsers
//!
//! The planner and workers only know the `CatalogParser` and `DetailParser`
//! traits. The default implementations understand the YouControl KVED
//! catalog:
//! - Section tables with their chapter rows
//! - Chapter tables mixing group rows and class rows
//! - Paginated class listings with company links
//! - Company profile and beneficiary tables

use crate::crawler::fetcher::Document;
use crate::state::{DetailJob, FieldValue, ParsedRecord};
use crate::{ParseError, ParseResult};
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use url::Url;

/// A catalog section with the chapters listed under it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionEntry {
    pub code: String,
    pub name: String,
    pub chapters: Vec<ChapterEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterEntry {
    pub code: String,
    pub name: String,
}

/// One row of a chapter table, in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterRow {
    Group { code: String, name: String },
    Class { code: String, name: String },
}

/// A company link found on a listing page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLink {
    pub identifier: String,
    pub url: Url,
}

/// Extracts the catalog tree and listing links
pub trait CatalogParser: Send + Sync {
    fn sections(&self, doc: &Document) -> ParseResult<Vec<SectionEntry>>;

    fn chapter_url(&self, root: &Url, chapter_code: &str) -> ParseResult<Url>;

    fn chapter_rows(&self, doc: &Document) -> ParseResult<Vec<ChapterRow>>;

    fn class_url(&self, chapter_url: &Url, class_code: &str) -> ParseResult<Url>;

    /// Number of listing pages; a page without pagination has exactly one
    fn page_count(&self, doc: &Document) -> u32;

    fn page_url(&self, class_url: &Url, page: u32) -> Url;

    fn listing_links(&self, doc: &Document) -> Vec<ListingLink>;

    /// Substring a listing page with companies on it always contains
    fn listing_marker(&self) -> Option<&str> {
        None
    }
}

/// Turns a company page into a record
pub trait DetailParser: Send + Sync {
    /// Returns `ParseError::Missing` when the page holds none of the
    /// expected content, which callers treat as retryable.
    fn parse(&self, doc: &Document, job: &DetailJob) -> ParseResult<ParsedRecord>;

    /// Substring a usable detail page always contains
    fn expected_marker(&self) -> Option<&str> {
        None
    }
}

fn selector(css: &str) -> ParseResult<Selector> {
    Selector::parse(css).map_err(|e| ParseError::Selector(format!("{}: {:?}", css, e)))
}

/// Collapses runs of whitespace into single spaces
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn element_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<String>())
}

fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope.select(selector).next().map(element_text)
}

fn next_td(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "td")
}

/// First run of `min..=max` ASCII digits in `text`
fn digit_run(text: &str, min: usize, max: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut start = None;

    for i in 0..=bytes.len() {
        let is_digit = i < bytes.len() && bytes[i].is_ascii_digit();
        match (is_digit, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                let len = i - s;
                if (min..=max).contains(&len) {
                    return Some(&text[s..i]);
                }
                start = None;
            }
            _ => {}
        }
    }
    None
}

/// Normalizes a table label into an upper-case column key
///
/// Punctuation is dropped and whitespace becomes underscores:
/// "Дата реєстрації:" becomes "ДАТА_РЕЄСТРАЦІЇ".
pub fn normalize_key(label: &str) -> String {
    let kept: String = label
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    clean_text(&kept).replace(' ', "_").to_uppercase()
}

/// KVED catalog markup as served by youcontrol.com.ua
#[derive(Debug, Clone, Default)]
pub struct YouControlCatalog;

impl CatalogParser for YouControlCatalog {
    fn sections(&self, doc: &Document) -> ParseResult<Vec<SectionEntry>> {
        let html = doc.html();
        let block_sel = selector("div.kved-catalog-table")?;
        let code_sel = selector("td.green-col-word")?;
        let name_sel = selector("td.caps-col")?;
        let chapter_sel = selector("td.green-col-num")?;

        let mut sections = Vec::new();
        for block in html.select(&block_sel) {
            let Some(code) = first_text(block, &code_sel) else {
                tracing::debug!("Skipping catalog table without a section code");
                continue;
            };
            let name = first_text(block, &name_sel).unwrap_or_default();

            let chapters = block
                .select(&chapter_sel)
                .map(|td| ChapterEntry {
                    code: element_text(td),
                    name: next_td(td).map(element_text).unwrap_or_default(),
                })
                .filter(|c| !c.code.is_empty())
                .collect();

            sections.push(SectionEntry {
                code,
                name,
                chapters,
            });
        }

        if sections.is_empty() {
            return Err(ParseError::Missing("div.kved-catalog-table".to_string()));
        }
        Ok(sections)
    }

    fn chapter_url(&self, root: &Url, chapter_code: &str) -> ParseResult<Url> {
        let base = if root.path().ends_with('/') {
            root.clone()
        } else {
            Url::parse(&format!("{}/", root))
                .map_err(|e| ParseError::Malformed(format!("catalog root {}: {}", root, e)))?
        };
        base.join(chapter_code)
            .map_err(|e| ParseError::Malformed(format!("chapter {}: {}", chapter_code, e)))
    }

    fn chapter_rows(&self, doc: &Document) -> ParseResult<Vec<ChapterRow>> {
        let html = doc.html();
        let table_sel = selector("table")?;
        let row_sel = selector("tr")?;
        let group_sel = selector("td.green-col-word")?;
        let group_name_sel = selector("td.caps-col")?;
        let class_sel = selector("td.green-col-num")?;

        let table = html
            .select(&table_sel)
            .next()
            .ok_or_else(|| ParseError::Missing("chapter table".to_string()))?;

        let mut rows = Vec::new();
        for tr in table.select(&row_sel) {
            if let Some(code) = first_text(tr, &group_sel) {
                rows.push(ChapterRow::Group {
                    code,
                    name: first_text(tr, &group_name_sel).unwrap_or_default(),
                });
            } else if let Some(td) = tr.select(&class_sel).next() {
                rows.push(ChapterRow::Class {
                    code: element_text(td),
                    name: next_td(td).map(element_text).unwrap_or_default(),
                });
            }
        }
        Ok(rows)
    }

    fn class_url(&self, chapter_url: &Url, class_code: &str) -> ParseResult<Url> {
        let digits: Vec<char> = class_code.chars().collect();
        if digits.len() < 2 {
            return Err(ParseError::Malformed(format!("class code {:?}", class_code)));
        }
        let suffix: String = digits[digits.len() - 2..].iter().collect();

        let url = format!("{}/{}", chapter_url.as_str().trim_end_matches('/'), suffix);
        Url::parse(&url).map_err(|e| ParseError::Malformed(format!("class {}: {}", class_code, e)))
    }

    fn page_count(&self, doc: &Document) -> u32 {
        let html = doc.html();
        let Ok(link_sel) = selector("ul.pagination a") else {
            return 1;
        };

        html.select(&link_sel)
            .filter_map(|a| element_text(a).parse::<u32>().ok())
            .max()
            .unwrap_or(1)
            .max(1)
    }

    fn page_url(&self, class_url: &Url, page: u32) -> Url {
        let mut url = class_url.clone();
        url.query_pairs_mut()
            .clear()
            .append_pair("page", &page.to_string());
        url
    }

    fn listing_links(&self, doc: &Document) -> Vec<ListingLink> {
        let html = doc.html();
        let Ok(link_sel) = selector("a.link-details.link-open") else {
            return Vec::new();
        };

        let mut links = Vec::new();
        for a in html.select(&link_sel) {
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            let Ok(url) = doc.url.join(href.trim()) else {
                tracing::debug!("Skipping unresolvable company link {:?}", href);
                continue;
            };

            let text = element_text(a);
            let head = text.split(',').next().unwrap_or_default().trim();
            let identifier = digit_run(head, 8, 10).unwrap_or(head).to_string();
            if identifier.is_empty() {
                continue;
            }

            links.push(ListingLink { identifier, url });
        }
        links
    }

    fn listing_marker(&self) -> Option<&str> {
        Some("link-details")
    }
}

/// Company profile page markup as served by youcontrol.com.ua
#[derive(Debug, Clone, Default)]
pub struct YouControlDetail;

impl YouControlDetail {
    const PROFILE_BLOCK: &'static str = "div#catalog-company-file";
    const BENEFICIARY_BLOCK: &'static str = "div#catalog-company-beneficiary";

    /// Reads `seo-table-row` key/value pairs from one block into `record`
    fn read_table(
        html: &Html,
        block_css: &str,
        value_css: &[&str],
        prefix: &str,
        record: &mut ParsedRecord,
    ) -> ParseResult<bool> {
        let block_sel = selector(block_css)?;
        let Some(block) = html.select(&block_sel).next() else {
            return Ok(false);
        };

        let row_sel = selector("div.seo-table-row")?;
        let key_sel = selector("div.seo-table-col-1")?;
        let item_sel = selector("li")?;
        let value_sels = value_css
            .iter()
            .map(|css| selector(css))
            .collect::<ParseResult<Vec<_>>>()?;

        for row in block.select(&row_sel) {
            let Some(label) = first_text(row, &key_sel) else {
                continue;
            };
            let key = normalize_key(&label);
            if key.is_empty() {
                continue;
            }

            let Some(cell) = value_sels.iter().find_map(|sel| row.select(sel).next()) else {
                continue;
            };
            if cell.value().classes().any(|c| c == "copy-hover") {
                continue;
            }

            // Repeated entries (founders, signers) are kept as a list
            let items: Vec<BTreeMap<String, String>> = cell
                .select(&item_sel)
                .map(element_text)
                .filter(|t| !t.is_empty())
                .map(|t| BTreeMap::from([("VALUE".to_string(), t)]))
                .collect();

            let field = format!("{}_{}", prefix, key);
            if items.len() > 1 {
                record.insert(field, FieldValue::List(items));
            } else {
                let value = element_text(cell);
                if !value.is_empty() {
                    record.insert(field, value);
                }
            }
        }
        Ok(true)
    }
}

impl DetailParser for YouControlDetail {
    fn parse(&self, doc: &Document, job: &DetailJob) -> ParseResult<ParsedRecord> {
        let html = doc.html();
        let mut record = ParsedRecord::for_job(job);

        let has_profile = Self::read_table(
            &html,
            Self::PROFILE_BLOCK,
            &[
                "span.copy-file-field",
                "div.copy-file-field",
                "p.copy-file-field",
                "div.seo-table-col-2",
            ],
            "PROFILE",
            &mut record,
        )?;

        let has_beneficiary = Self::read_table(
            &html,
            Self::BENEFICIARY_BLOCK,
            &["span.copy-file-field", "div.seo-table-col-2"],
            "BENEFICIARY",
            &mut record,
        )?;

        if !has_profile && !has_beneficiary {
            return Err(ParseError::Missing(format!(
                "{} or {}",
                Self::PROFILE_BLOCK,
                Self::BENEFICIARY_BLOCK
            )));
        }

        let title_sel = selector("h2.seo-table-name")?;
        if let Some(title) = html.select(&title_sel).next().map(element_text) {
            if let Some(code) = digit_run(&title, 8, 10) {
                record.insert("EDRPOU_FROM_TITLE", code);
            }
        }

        record.insert("PARSED_AT", chrono::Utc::now().to_rfc3339());
        Ok(record)
    }

    fn expected_marker(&self) -> Option<&str> {
        Some("seo-table-row")
    }
}

/// Detail parser with its page marker replaced
#[derive(Debug, Clone)]
pub struct WithMarker<P> {
    inner: P,
    marker: String,
}

impl<P: DetailParser> WithMarker<P> {
    pub fn new(inner: P, marker: impl Into<String>) -> Self {
        Self {
            inner,
            marker: marker.into(),
        }
    }
}

impl<P: DetailParser> DetailParser for WithMarker<P> {
    fn parse(&self, doc: &Document, job: &DetailJob) -> ParseResult<ParsedRecord> {
        self.inner.parse(doc, job)
    }

    fn expected_marker(&self) -> Option<&str> {
        Some(&self.marker)
    }
}

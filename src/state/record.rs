//! Parsed company records
//!
//! Records keep their fields in insertion order so that the identifier and
//! hierarchy columns always lead the output files.

use crate::state::DetailJob;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

pub const IDENTIFIER_FIELD: &str = "EDRPOU_CODE";

/// A single field value: plain text or a repeated sub-entity list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<BTreeMap<String, String>>),
}

impl FieldValue {
    /// Renders the value as a single CSV cell
    pub fn to_cell(&self) -> String {
        match self {
            FieldValue::Text(text) => text.clone(),
            FieldValue::List(items) => serde_json::to_string(items).unwrap_or_default(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

/// Field-name to value mapping for one company
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRecord {
    fields: Vec<(String, FieldValue)>,
}

impl ParsedRecord {
    /// Starts a record pre-filled with the identifier and hierarchy context
    pub fn for_job(job: &DetailJob) -> Self {
        let ctx = &job.context;
        let mut record = Self { fields: Vec::new() };
        record.insert(IDENTIFIER_FIELD, job.company_identifier.as_str());
        record.insert("SECTION_CODE", ctx.section_code.as_str());
        record.insert("SECTION_NAME", ctx.section_name.as_str());
        record.insert("CHAPTER_CODE", ctx.chapter_code.as_str());
        record.insert("CHAPTER_NAME", ctx.chapter_name.as_str());
        record.insert("GROUP_CODE", ctx.group_code.as_str());
        record.insert("GROUP_NAME", ctx.group_name.as_str());
        record.insert("CLASS_CODE", ctx.class_code.as_str());
        record.insert("CLASS_NAME", ctx.class_name.as_str());
        record.insert("PAGE", ctx.page_number.to_string());
        record.insert("URL", job.target_url.as_str());
        record
    }

    /// Sets a field, replacing an existing value in place
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        let key = key.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(FieldValue::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn identifier(&self) -> Option<&str> {
        self.text(IDENTIFIER_FIELD)
    }

    pub fn class_code(&self) -> Option<&str> {
        self.text("CLASS_CODE")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl Serialize for ParsedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

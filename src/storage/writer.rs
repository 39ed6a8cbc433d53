//! Batch file writers
//!
//! Records are grouped by class code so every catalog leaf gets its own
//! files. CSV output writes one new file per batch and class; JSON-lines
//! output appends to one file per class.

use crate::state::ParsedRecord;
use crate::storage::traits::{RecordWriter, StorageResult};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

const UNCLASSIFIED: &str = "unclassified";

/// Makes a class code safe to embed in a file name
fn file_label(class_code: Option<&str>) -> String {
    let label: String = class_code
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if label.is_empty() {
        UNCLASSIFIED.to_string()
    } else {
        label
    }
}

/// Groups records by their class label, keeping arrival order within a group
fn group_by_class(records: &[ParsedRecord]) -> BTreeMap<String, Vec<&ParsedRecord>> {
    let mut groups: BTreeMap<String, Vec<&ParsedRecord>> = BTreeMap::new();
    for record in records {
        groups
            .entry(file_label(record.class_code()))
            .or_default()
            .push(record);
    }
    groups
}

/// One CSV file per flushed batch and class
#[derive(Debug)]
pub struct CsvBatchWriter {
    directory: PathBuf,
    prefix: String,
    sequence: u64,
}

impl CsvBatchWriter {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> StorageResult<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            prefix: prefix.into(),
            sequence: 0,
        })
    }

    fn write_file(&self, path: &Path, records: &[&ParsedRecord]) -> StorageResult<()> {
        // Union of all field names, in first-seen order
        let mut header: Vec<&str> = Vec::new();
        for record in records {
            for (key, _) in record.iter() {
                if !header.contains(&key) {
                    header.push(key);
                }
            }
        }

        let file = File::create(path)?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));
        writer.write_record(&header)?;

        for record in records {
            let row: Vec<String> = header
                .iter()
                .map(|key| record.get(key).map(|v| v.to_cell()).unwrap_or_default())
                .collect();
            writer.write_record(&row)?;
        }

        let buffered = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        let file = buffered
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        file.sync_all()?;
        Ok(())
    }
}

impl RecordWriter for CsvBatchWriter {
    fn write_batch(&mut self, records: &[ParsedRecord]) -> StorageResult<usize> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let mut written = 0;

        for (label, group) in group_by_class(records) {
            self.sequence += 1;
            let path = self.directory.join(format!(
                "{}_{}_{}_{:04}.csv",
                self.prefix, label, stamp, self.sequence
            ));
            self.write_file(&path, &group)?;
            tracing::info!("Wrote {} records to {}", group.len(), path.display());
            written += group.len();
        }
        Ok(written)
    }
}

/// One append-only JSON-lines file per class
#[derive(Debug)]
pub struct JsonLinesWriter {
    directory: PathBuf,
    prefix: String,
}

impl JsonLinesWriter {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> StorageResult<Self> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self {
            directory,
            prefix: prefix.into(),
        })
    }
}

impl RecordWriter for JsonLinesWriter {
    fn write_batch(&mut self, records: &[ParsedRecord]) -> StorageResult<usize> {
        let mut written = 0;

        for (label, group) in group_by_class(records) {
            let path = self
                .directory
                .join(format!("{}_{}.jsonl", self.prefix, label));
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let mut out = BufWriter::new(file);

            for record in &group {
                serde_json::to_writer(&mut out, record)?;
                out.write_all(b"\n")?;
            }

            let file = out
                .into_inner()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
            file.sync_all()?;

            tracing::info!("Appended {} records to {}", group.len(), path.display());
            written += group.len();
        }
        Ok(written)
    }
}

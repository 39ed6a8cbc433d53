//! Storage module for persisting crawl progress and results
//!
//! This module handles everything the crawler writes to disk:
//! - The JSON checkpoint with atomic replace-on-save
//! - Buffering parsed records and flushing them in batches
//! - CSV and JSON-lines batch files, one set per catalog class

mod checkpoint;
mod sink;
mod traits;
mod writer;

pub use checkpoint::JsonCheckpointStore;
pub use sink::ResultSink;
pub use traits::{
    CheckpointRecord, CheckpointStore, RecordWriter, StorageError, StorageResult,
};
pub use writer::{CsvBatchWriter, JsonLinesWriter};

#[cfg(test)]
pub(crate) use sink::memory::MemoryWriter;

use crate::config::{OutputConfig, OutputFormat};

/// Opens the record writer selected by the output configuration
pub fn open_writer(config: &OutputConfig) -> StorageResult<Box<dyn RecordWriter>> {
    let writer: Box<dyn RecordWriter> = match config.format {
        OutputFormat::Csv => Box::new(CsvBatchWriter::new(
            &config.directory,
            config.file_prefix.clone(),
        )?),
        OutputFormat::Jsonl => Box::new(JsonLinesWriter::new(
            &config.directory,
            config.file_prefix.clone(),
        )?),
    };
    Ok(writer)
}

/// Builds the result sink for a run
pub fn open_sink(config: &OutputConfig) -> StorageResult<ResultSink> {
    Ok(ResultSink::new(open_writer(config)?, config.batch_size))
}

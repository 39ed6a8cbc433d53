//! Result sink
//!
//! Workers hand parsed records to the sink concurrently. All buffering and
//! writing happens under one async mutex, which makes the flush path the
//! single writer of the output files. The file I/O itself runs on the
//! blocking thread pool.

use crate::state::ParsedRecord;
use crate::storage::traits::{RecordWriter, StorageError, StorageResult};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

struct SinkInner {
    buffer: Vec<ParsedRecord>,
    /// Lent to the blocking pool while a batch is being written
    writer: Option<Box<dyn RecordWriter>>,
}

impl SinkInner {
    /// Writes the whole buffer; the buffer is only cleared once written
    async fn write_buffer(&mut self) -> StorageResult<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let mut writer = self.writer.take().ok_or_else(|| {
            StorageError::Task("record writer lost by an earlier write".to_string())
        })?;
        let batch = std::mem::take(&mut self.buffer);

        let (writer, batch, result) = tokio::task::spawn_blocking(move || {
            let result = writer.write_batch(&batch);
            (writer, batch, result)
        })
        .await?;

        self.writer = Some(writer);
        match result {
            Ok(written) => Ok(written),
            Err(e) => {
                self.buffer = batch;
                Err(e)
            }
        }
    }
}

/// Buffers records and writes them in batches
pub struct ResultSink {
    inner: Mutex<SinkInner>,
    batch_size: usize,
    accepted: AtomicU64,
    written: AtomicU64,
}

impl ResultSink {
    pub fn new(writer: Box<dyn RecordWriter>, batch_size: usize) -> Self {
        Self {
            inner: Mutex::new(SinkInner {
                buffer: Vec::with_capacity(batch_size.max(1)),
                writer: Some(writer),
            }),
            batch_size: batch_size.max(1),
            accepted: AtomicU64::new(0),
            written: AtomicU64::new(0),
        }
    }

    /// Buffers one record, writing the batch once it is full
    ///
    /// Returns the number of records written by this call.
    pub async fn accept(&self, record: ParsedRecord) -> StorageResult<usize> {
        let mut inner = self.inner.lock().await;
        inner.buffer.push(record);
        self.accepted.fetch_add(1, Ordering::Relaxed);

        if inner.buffer.len() < self.batch_size {
            return Ok(0);
        }

        let written = inner.write_buffer().await?;
        self.written.fetch_add(written as u64, Ordering::Relaxed);
        Ok(written)
    }

    /// Writes everything buffered so far
    pub async fn flush(&self) -> StorageResult<usize> {
        let mut inner = self.inner.lock().await;
        let written = inner.write_buffer().await?;
        if written > 0 {
            tracing::debug!("Flushed {} records", written);
        }
        self.written.fetch_add(written as u64, Ordering::Relaxed);
        Ok(written)
    }

    pub async fn buffered(&self) -> usize {
        self.inner.lock().await.buffer.len()
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSink")
            .field("batch_size", &self.batch_size)
            .field("accepted", &self.accepted())
            .field("written", &self.written())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::memory::MemoryWriter;
    use super::*;
    use crate::state::{DetailJob, HierarchyContext};
    use crate::storage::StorageError;
    use url::Url;

    fn record(n: usize) -> ParsedRecord {
        let job = DetailJob::new(
            Url::parse(&format!("https://example.com/company/{}", n)).unwrap(),
            format!("{:08}", n),
            HierarchyContext::default(),
        );
        ParsedRecord::for_job(&job)
    }

    #[tokio::test]
    async fn test_batch_writes_exactly_batch_size() {
        let writer = MemoryWriter::default();
        let sink = ResultSink::new(Box::new(writer.clone()), 3);

        assert_eq!(sink.accept(record(1)).await.unwrap(), 0);
        assert_eq!(sink.accept(record(2)).await.unwrap(), 0);
        assert_eq!(sink.accept(record(3)).await.unwrap(), 3);

        assert_eq!(sink.buffered().await, 0);
        let batches = writer.batches.lock().unwrap().clone();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[tokio::test]
    async fn test_flush_writes_partial_batch() {
        let writer = MemoryWriter::default();
        let sink = ResultSink::new(Box::new(writer.clone()), 50);

        sink.accept(record(1)).await.unwrap();
        sink.accept(record(2)).await.unwrap();
        assert_eq!(sink.flush().await.unwrap(), 2);
        assert_eq!(sink.flush().await.unwrap(), 0);

        assert_eq!(writer.records().len(), 2);
        assert_eq!(sink.accepted(), 2);
        assert_eq!(sink.written(), 2);
    }

    struct FailingWriter;

    impl RecordWriter for FailingWriter {
        fn write_batch(&mut self, _records: &[ParsedRecord]) -> StorageResult<usize> {
            Err(StorageError::InvalidPath("read-only".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_write_keeps_buffer() {
        let sink = ResultSink::new(Box::new(FailingWriter), 10);
        sink.accept(record(1)).await.unwrap();

        assert!(sink.flush().await.is_err());
        assert_eq!(sink.buffered().await, 1);
        assert_eq!(sink.written(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_accepts() {
        let writer = MemoryWriter::default();
        let sink = std::sync::Arc::new(ResultSink::new(Box::new(writer.clone()), 7));

        let handles: Vec<_> = (0..40)
            .map(|n| {
                let sink = sink.clone();
                tokio::spawn(async move { sink.accept(record(n)).await.unwrap() })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        sink.flush().await.unwrap();

        assert_eq!(writer.records().len(), 40);
        assert!(writer.batches.lock().unwrap().iter().all(|b| b.len() <= 7));
    }

    /// Remembers which thread each batch was written on
    #[derive(Clone, Default)]
    struct ThreadWriter {
        threads: std::sync::Arc<std::sync::Mutex<Vec<std::thread::ThreadId>>>,
    }

    impl RecordWriter for ThreadWriter {
        fn write_batch(&mut self, records: &[ParsedRecord]) -> StorageResult<usize> {
            self.threads
                .lock()
                .unwrap()
                .push(std::thread::current().id());
            Ok(records.len())
        }
    }

    #[tokio::test]
    async fn test_batches_written_on_blocking_pool() {
        let writer = ThreadWriter::default();
        let sink = ResultSink::new(Box::new(writer.clone()), 2);

        sink.accept(record(1)).await.unwrap();
        sink.accept(record(2)).await.unwrap();
        sink.accept(record(3)).await.unwrap();
        sink.flush().await.unwrap();

        let threads = writer.threads.lock().unwrap().clone();
        assert_eq!(threads.len(), 2);
        assert!(threads.iter().all(|t| *t != std::thread::current().id()));
    }

    #[tokio::test]
    async fn test_writer_survives_failed_batch() {
        struct FailOnce {
            failed: bool,
            inner: MemoryWriter,
        }

        impl RecordWriter for FailOnce {
            fn write_batch(&mut self, records: &[ParsedRecord]) -> StorageResult<usize> {
                if !self.failed {
                    self.failed = true;
                    return Err(StorageError::InvalidPath("disk full".to_string()));
                }
                self.inner.write_batch(records)
            }
        }

        let memory = MemoryWriter::default();
        let sink = ResultSink::new(
            Box::new(FailOnce {
                failed: false,
                inner: memory.clone(),
            }),
            10,
        );
        sink.accept(record(1)).await.unwrap();
        sink.accept(record(2)).await.unwrap();

        assert!(sink.flush().await.is_err());
        assert_eq!(sink.flush().await.unwrap(), 2);
        assert_eq!(memory.records().len(), 2);
    }
}

//! Log batching.
//!
//! Individual log calls are grouped into batches so the service receives one
//! multipart request per batch instead of one per line. A batch is handed
//! back for dispatch as soon as it reaches the configured record count, or
//! when the next record would push its estimated wire size past the payload
//! limit.
//!
//! # Example
//!
//! ```
//! use rp_client::batcher::LogBatcher;
//! use rp_client::model::{Id, LogRecord};
//!
//! let batcher = LogBatcher::new(2, 1_000_000);
//! let launch = Id::new("launch-1");
//!
//! assert!(batcher.append(LogRecord::new(launch.clone(), "1", "first")).is_none());
//! let full = batcher.append(LogRecord::new(launch.clone(), "2", "second")).unwrap();
//! assert_eq!(full.len(), 2);
//!
//! batcher.append(LogRecord::new(launch, "3", "third"));
//! assert_eq!(batcher.flush().len(), 1);
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::deferred::MaybeDeferred;
use crate::model::{Id, LogRecord};
use crate::request::{
    MULTIPART_FOOTER_LENGTH, PLACEHOLDER_ID, file_part_size, json_part_size, log_payload,
};

/// Default maximum number of records per batch.
pub const DEFAULT_BATCH_MAX_COUNT: usize = 20;

/// Default maximum estimated multipart size of a batch, in bytes.
pub const DEFAULT_BATCH_MAX_PAYLOAD_SIZE: usize = 65_000_000;

struct Batch {
    records: Vec<LogRecord>,
    payload_size: usize,
}

impl Batch {
    fn empty() -> Self {
        Self {
            records: Vec::new(),
            payload_size: MULTIPART_FOOTER_LENGTH,
        }
    }

    fn take(&mut self) -> Vec<LogRecord> {
        std::mem::replace(self, Self::empty()).records
    }
}

/// Accumulates log records into count- and size-bounded batches.
pub struct LogBatcher {
    max_count: usize,
    max_payload_size: usize,
    batch: Mutex<Batch>,
}

impl LogBatcher {
    /// Creates a batcher with the given bounds.
    ///
    /// A `max_count` below 1 is clamped to 1.
    pub fn new(max_count: usize, max_payload_size: usize) -> Self {
        Self {
            max_count: max_count.max(1),
            max_payload_size,
            batch: Mutex::new(Batch::empty()),
        }
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    fn lock(&self) -> MutexGuard<'_, Batch> {
        self.batch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a record, returning a batch that is ready for dispatch.
    ///
    /// Identifiers still pending are measured as a placeholder UUID.
    pub fn append(&self, record: LogRecord) -> Option<Vec<LogRecord>> {
        let size = record_size(&record);
        self.append_sized(record, size)
    }

    /// Resolves the record's identifiers, then appends it.
    ///
    /// Waiting happens before the batch lock is taken. An identifier that
    /// fails to resolve is recorded as [`Id::NotFound`].
    pub async fn append_awaiting(&self, record: LogRecord) -> Option<Vec<LogRecord>> {
        let launch = record.launch.get().await.unwrap_or(Id::NotFound);
        let item = match &record.item {
            Some(item) => Some(item.get().await.unwrap_or(Id::NotFound)),
            None => None,
        };
        let resolved = LogRecord {
            launch: MaybeDeferred::Resolved(launch),
            item: item.map(MaybeDeferred::Resolved),
            ..record
        };
        let size = record_size(&resolved);
        self.append_sized(resolved, size)
    }

    fn append_sized(&self, record: LogRecord, size: usize) -> Option<Vec<LogRecord>> {
        let mut batch = self.lock();
        if !batch.records.is_empty() && batch.payload_size + size > self.max_payload_size {
            let ready = batch.take();
            batch.records.push(record);
            batch.payload_size += size;
            return Some(ready);
        }
        batch.records.push(record);
        batch.payload_size += size;
        if batch.records.len() >= self.max_count {
            return Some(batch.take());
        }
        None
    }

    /// Returns and clears the current batch.
    pub fn flush(&self) -> Vec<LogRecord> {
        self.lock().take()
    }

    /// Number of records waiting in the current batch.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimated multipart size of the current batch, footer included.
    pub fn payload_size(&self) -> usize {
        self.lock().payload_size
    }
}

impl Default for LogBatcher {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_MAX_COUNT, DEFAULT_BATCH_MAX_PAYLOAD_SIZE)
    }
}

fn measured_id(id: &MaybeDeferred<Id>) -> Id {
    match id.peek() {
        Some(Ok(id)) => id,
        Some(Err(_)) => Id::NotFound,
        None => Id::new(PLACEHOLDER_ID),
    }
}

/// Estimated wire size of one record inside a batch.
pub fn record_size(record: &LogRecord) -> usize {
    let launch = measured_id(&record.launch);
    let item = record.item.as_ref().map(measured_id);
    let payload = log_payload(record, &launch, item.as_ref());
    json_part_size(&payload) + file_part_size(record.attachment.as_ref())
}

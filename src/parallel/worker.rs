//! Chunk worker: turns one chunk into a validated batch of records

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, warn};

use crate::error::{ChunkError, ChunkErrorKind};
use crate::record::{record_id, Chunk, ProcessedRecord};
use crate::stats::ProcessingStats;
use crate::transform::LineTransform;

use super::handle::{panic_message, CancelToken};

/// Processes a single chunk; consumed by [`ChunkWorker::run`]
#[derive(Debug)]
pub struct ChunkWorker {
    chunk: Chunk,
    transform: LineTransform,
    stats: Arc<ProcessingStats>,
}

impl ChunkWorker {
    pub fn new(chunk: Chunk, transform: LineTransform, stats: Arc<ProcessingStats>) -> Self {
        Self {
            chunk,
            transform,
            stats,
        }
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    /// Transform, validate and count the chunk.
    ///
    /// On success the chunks-processed and total-records counters are bumped;
    /// any failure bumps the error counter instead, except cancellation, which
    /// is accounted for by whoever requested it. A chunk cancelled before it
    /// finished reports `Cancelled` even if its last line completed.
    pub fn run(self, cancel: &CancelToken) -> Result<Vec<ProcessedRecord>, ChunkError> {
        debug!(
            thread = thread::current().name().unwrap_or("caller"),
            chunk = %self.chunk,
            "processing chunk"
        );

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<_, ChunkError> {
            let records = self.process_chunk(cancel)?;
            validate_batch(self.chunk.id(), &records)?;
            Ok(records)
        }))
        .unwrap_or_else(|payload| {
            Err(ChunkError::new(
                self.chunk.id(),
                ChunkErrorKind::Panicked(panic_message(payload.as_ref())),
            ))
        });

        // Timed out or interrupted while running: the requester already
        // accounted for this chunk, so its result must not count.
        let outcome = match outcome {
            Err(err) if err.is_cancelled() => Err(err),
            _ if cancel.is_cancelled() => Err(ChunkError::new(self.chunk.id(), ChunkErrorKind::Cancelled)),
            other => other,
        };

        match outcome {
            Ok(records) => {
                self.stats.add_chunk_processed();
                self.stats.add_records(records.len() as u64);
                Ok(records)
            }
            Err(err) if err.is_cancelled() => {
                debug!(chunk = self.chunk.id(), "chunk cancelled");
                Err(err)
            }
            Err(err) => {
                self.stats.add_error();
                error!(chunk = self.chunk.id(), error = %err, "failed to process chunk");
                Err(err)
            }
        }
    }

    /// Build one record per non-blank line. A line whose transform fails is
    /// logged and skipped without affecting the rest of the chunk.
    pub fn process_chunk(&self, cancel: &CancelToken) -> Result<Vec<ProcessedRecord>, ChunkError> {
        let mut results = Vec::with_capacity(self.chunk.len());
        let source_file = self.chunk.source_file();

        for (line_number, line) in self.chunk.numbered_lines() {
            if cancel.is_cancelled() {
                return Err(ChunkError::new(self.chunk.id(), ChunkErrorKind::Cancelled));
            }
            if line.trim().is_empty() {
                continue;
            }

            match self.transform.apply(line, line_number, source_file) {
                Ok(content) => {
                    let id = record_id(source_file, line_number, line);
                    results.push(ProcessedRecord::new(id, content));
                }
                Err(err) => {
                    warn!(
                        chunk = self.chunk.id(),
                        line = line_number,
                        error = %err,
                        "error processing line, skipping"
                    );
                }
            }
        }

        Ok(results)
    }
}

/// Reject a batch containing a record without a usable id
pub fn validate_batch(chunk_id: &str, records: &[ProcessedRecord]) -> Result<(), ChunkError> {
    match records.iter().position(|r| r.id.trim().is_empty()) {
        Some(index) => Err(ChunkError::new(chunk_id, ChunkErrorKind::InvalidId { index })),
        None => Ok(()),
    }
}

//! Result collector: drains submission handles in submission order
//!
//! Every wait is bounded by the per-item timeout. A timeout, failure or
//! cancellation only loses that chunk; a shutdown request stops the drain but
//! keeps everything merged so far.

use crossbeam_channel::{after, never, select, Receiver};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::aggregate::Aggregator;
use crate::error::TaskError;
use crate::platform::Ctrl;
use crate::record::{Chunk, ProcessedRecord};
use crate::stats::ProcessingStats;

use super::handle::TaskHandle;

/// Default per-chunk wait
pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A chunk's result handle plus submission bookkeeping
#[derive(Debug)]
pub struct SubmissionHandle {
    chunk_id: String,
    source_file: String,
    line_count: usize,
    handle: TaskHandle<Vec<ProcessedRecord>>,
    submitted_at: Instant,
    completed_at: Option<Instant>,
}

impl SubmissionHandle {
    pub fn new(chunk: &Chunk, handle: TaskHandle<Vec<ProcessedRecord>>) -> Self {
        Self::from_parts(chunk.id(), chunk.source_file(), chunk.len(), handle)
    }

    /// For callers that already handed the chunk itself to a worker
    pub fn from_parts(
        chunk_id: impl Into<String>,
        source_file: impl Into<String>,
        line_count: usize,
        handle: TaskHandle<Vec<ProcessedRecord>>,
    ) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            source_file: source_file.into(),
            line_count,
            handle,
            submitted_at: Instant::now(),
            completed_at: None,
        }
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk_id
    }

    pub fn source_file(&self) -> &str {
        &self.source_file
    }

    pub fn line_count(&self) -> usize {
        self.line_count
    }

    pub fn is_done(&self) -> bool {
        self.handle.is_done()
    }

    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    pub fn completed_at(&self) -> Option<Instant> {
        self.completed_at
    }

    /// Time from submission to resolution, or to now while still pending
    pub fn processing_time(&self) -> Duration {
        self.completed_at
            .unwrap_or_else(Instant::now)
            .saturating_duration_since(self.submitted_at)
    }

    pub fn cancel(&self) -> bool {
        self.handle.cancel()
    }
}

/// What happened during one drain
#[derive(Debug, Default)]
pub struct CollectionReport {
    /// Records of every successful chunk, in submission order
    pub results: Vec<ProcessedRecord>,
    pub completed: usize,
    pub timed_out: Vec<String>,
    pub failed: Vec<String>,
    pub cancelled: Vec<String>,
    pub interrupted: bool,
}

impl CollectionReport {
    pub fn unsuccessful(&self) -> usize {
        self.timed_out.len() + self.failed.len() + self.cancelled.len()
    }
}

enum Received {
    Outcome(Option<super::handle::Outcome<Vec<ProcessedRecord>>>),
    Ctrl(Option<Ctrl>),
    Timeout,
}

#[derive(Debug, Clone)]
pub struct ResultCollector {
    timeout: Duration,
}

impl Default for ResultCollector {
    fn default() -> Self {
        Self::new(DEFAULT_COLLECT_TIMEOUT)
    }
}

impl ResultCollector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait on each submission in order, merging successful batches into
    /// `aggregator` as they are observed.
    pub fn collect(
        &self,
        submissions: &mut [SubmissionHandle],
        aggregator: &Aggregator,
        stats: &ProcessingStats,
        ctrl_rx: &Receiver<Ctrl>,
    ) -> CollectionReport {
        let mut report = CollectionReport::default();
        let mut ctrl_rx = ctrl_rx.clone();
        let total = submissions.len();

        for index in 0..total {
            let submission = &mut submissions[index];
            let outcome = self.wait_one(submission, &mut ctrl_rx, stats);

            match outcome {
                Ok(batch) => {
                    submission.completed_at = Some(Instant::now());
                    aggregator.merge(&batch);
                    report.results.extend(batch);
                    report.completed += 1;
                    info!(
                        "Progress: {}/{} chunks completed",
                        report.completed, total
                    );
                }
                Err(TaskError::Interrupted) => {
                    warn!(
                        chunk = submission.chunk_id(),
                        remaining = total - index,
                        "processing interrupted, stopping collection"
                    );
                    report.interrupted = true;
                    for pending in &submissions[index..] {
                        pending.cancel();
                    }
                    break;
                }
                Err(TaskError::Timeout(limit)) => {
                    submission.completed_at = Some(Instant::now());
                    error!(
                        chunk = submission.chunk_id(),
                        timeout = ?limit,
                        "chunk processing timed out, cancelling"
                    );
                    submission.cancel();
                    stats.add_error();
                    report.timed_out.push(submission.chunk_id.clone());
                }
                Err(TaskError::Cancelled) => {
                    submission.completed_at = Some(Instant::now());
                    warn!(chunk = submission.chunk_id(), "chunk was cancelled");
                    report.cancelled.push(submission.chunk_id.clone());
                }
                Err(TaskError::Failed(err)) if err.is_cancelled() => {
                    submission.completed_at = Some(Instant::now());
                    warn!(chunk = submission.chunk_id(), "chunk was cancelled");
                    report.cancelled.push(submission.chunk_id.clone());
                }
                Err(err) => {
                    submission.completed_at = Some(Instant::now());
                    error!(
                        chunk = submission.chunk_id(),
                        error = %err,
                        "chunk processing failed"
                    );
                    report.failed.push(submission.chunk_id.clone());
                }
            }
        }

        report
    }

    fn wait_one(
        &self,
        submission: &mut SubmissionHandle,
        ctrl_rx: &mut Receiver<Ctrl>,
        stats: &ProcessingStats,
    ) -> Result<Vec<ProcessedRecord>, TaskError> {
        if submission.handle.is_consumed() {
            return Err(TaskError::Disconnected);
        }

        let outcomes = submission.handle.receiver().clone();
        let deadline = Instant::now() + self.timeout;

        loop {
            let timeout = after(deadline.saturating_duration_since(Instant::now()));
            let ctrl = ctrl_rx.clone();
            let received = select! {
                recv(outcomes) -> msg => Received::Outcome(msg.ok()),
                recv(ctrl) -> msg => Received::Ctrl(msg.ok()),
                recv(timeout) -> _ => Received::Timeout,
            };

            match received {
                Received::Outcome(Some(outcome)) => return submission.handle.resolve(outcome),
                Received::Outcome(None) => return Err(submission.handle.disconnected()),
                Received::Ctrl(Some(Ctrl::Shutdown { .. })) => return Err(TaskError::Interrupted),
                Received::Ctrl(Some(Ctrl::PrintStats)) => {
                    info!("{}", stats.snapshot());
                }
                // Nobody can signal us any more; stop listening.
                Received::Ctrl(None) => *ctrl_rx = never(),
                Received::Timeout => return Err(TaskError::Timeout(self.timeout)),
            }
        }
    }
}

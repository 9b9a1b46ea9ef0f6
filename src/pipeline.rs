//! End-to-end run: split, submit, collect, aggregate

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::aggregate::{AggregationStats, Aggregator, SortStrategy};
use crate::config::ProcessorConfig;
use crate::parallel::{ChunkWorker, CollectionReport, PoolStats, ResultCollector, SubmissionHandle, WorkerPool};
use crate::platform::{Ctrl, SignalHandler};
use crate::record::{Chunk, ProcessedRecord};
use crate::splitter::FileSplitter;
use crate::stats::ProcessingStats;
use crate::transform::LineTransform;

/// Totals reported at the end of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub files_processed: u64,
    pub chunks_processed: u64,
    pub chunks_total: usize,
    /// Size of the final, post-processed result set
    pub total_records: usize,
    pub errors: u64,
    pub elapsed: Duration,
    pub aggregation: AggregationStats,
    pub pool: PoolStats,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn records_per_sec(&self) -> Option<f64> {
        let millis = self.elapsed.as_millis();
        if millis == 0 || self.total_records == 0 {
            return None;
        }
        Some(self.total_records as f64 * 1000.0 / millis as f64)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== PROCESSING SUMMARY ===")?;
        if self.interrupted {
            writeln!(f, "Run interrupted: results are partial")?;
        }
        writeln!(f, "Files processed: {}", self.files_processed)?;
        writeln!(f, "Chunks processed: {}/{}", self.chunks_processed, self.chunks_total)?;
        writeln!(f, "Total records: {}", self.total_records)?;
        writeln!(f, "Errors: {}", self.errors)?;
        writeln!(f, "Processing time: {}ms", self.elapsed.as_millis())?;
        match self.records_per_sec() {
            Some(rate) => writeln!(f, "Throughput: {:.0} records/s", rate)?,
            None => writeln!(f, "Throughput: n/a")?,
        }
        writeln!(f, "Aggregation: {}", self.aggregation)?;
        write!(f, "Thread pool stats: {}", self.pool)
    }
}

/// Final records plus the summary describing how they were produced
#[derive(Debug)]
pub struct RunOutput {
    pub summary: RunSummary,
    pub records: Vec<ProcessedRecord>,
}

pub struct Pipeline {
    config: ProcessorConfig,
    stats: Arc<ProcessingStats>,
    pool: Arc<WorkerPool>,
    aggregator: Arc<Aggregator>,
    transform: LineTransform,
    splitter: FileSplitter,
    collector: ResultCollector,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("input_dir", &self.config.input.input_dir)
            .field("transform", &self.transform)
            .field("pool", &self.pool.stats())
            .finish()
    }
}

impl Pipeline {
    /// Build every component from `config`. Starts the worker threads.
    pub fn new(config: ProcessorConfig) -> Result<Self> {
        config.validate()?;
        let transform = LineTransform::from_names(config.processing.transforms.as_slice())?;
        let splitter = FileSplitter::from_config(&config)?;
        let pool = WorkerPool::new(config.pool_config()).context("Failed to start worker pool")?;
        let aggregator = Aggregator::new(config.dedup(), config.sort());
        let collector = ResultCollector::new(config.processing.collect_timeout);

        Ok(Self {
            config,
            stats: Arc::new(ProcessingStats::new()),
            pool: Arc::new(pool),
            aggregator: Arc::new(aggregator),
            transform,
            splitter,
            collector,
        })
    }

    /// Replace the line transform used for every chunk
    pub fn with_transform(mut self, transform: LineTransform) -> Self {
        self.transform = transform;
        self
    }

    /// Replace the final sort order, e.g. with [`SortStrategy::custom`]
    pub fn with_sort(mut self, sort: Option<SortStrategy>) -> Self {
        self.aggregator = Arc::new(Aggregator::new(self.aggregator.dedup_strategy(), sort));
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<ProcessingStats> {
        &self.stats
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Run the whole pipeline over the configured input directory.
    ///
    /// The pool is shut down afterwards whether or not the run succeeded.
    pub fn execute(&self, ctrl_rx: &Receiver<Ctrl>) -> Result<RunOutput> {
        let result = self.run(ctrl_rx);
        self.shutdown();
        result
    }

    fn run(&self, ctrl_rx: &Receiver<Ctrl>) -> Result<RunOutput> {
        let input_dir = Path::new(&self.config.input.input_dir);
        info!(dir = %input_dir.display(), "reading input files");
        let chunks = self.splitter.split_directory(input_dir, &self.stats)?;
        let chunks_total = chunks.len();
        info!(
            chunks = chunks_total,
            threads = self.pool.config().core_threads,
            "processing chunks"
        );

        let report = self.process_chunks(chunks, ctrl_rx)?;

        info!("aggregating results");
        let records = self.aggregator.final_results();
        let summary = self.summary(chunks_total, records.len(), report.interrupted);
        Ok(RunOutput { summary, records })
    }

    /// Submit every chunk, then drain the handles in submission order.
    ///
    /// Returns the concatenation of all successful batches (before dedup and
    /// sort); the same batches are merged into the aggregator as they arrive.
    pub fn process_chunks(&self, chunks: Vec<Chunk>, ctrl_rx: &Receiver<Ctrl>) -> Result<CollectionReport> {
        let mut submissions = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            if SignalHandler::should_terminate() {
                warn!(submitted = submissions.len(), "termination requested, not submitting remaining chunks");
                break;
            }

            let chunk_id = chunk.id().to_string();
            let source_file = chunk.source_file().to_string();
            let line_count = chunk.len();
            let worker = ChunkWorker::new(chunk, self.transform.clone(), Arc::clone(&self.stats));
            let handle = self
                .pool
                .submit(move |cancel| worker.run(cancel))
                .with_context(|| format!("Failed to submit {}", chunk_id))?;
            submissions.push(SubmissionHandle::from_parts(chunk_id, source_file, line_count, handle));
        }

        let report = self
            .collector
            .collect(&mut submissions, &self.aggregator, &self.stats, ctrl_rx);

        if report.unsuccessful() > 0 {
            warn!(
                timed_out = report.timed_out.len(),
                failed = report.failed.len(),
                cancelled = report.cancelled.len(),
                "some chunks produced no results"
            );
        }
        Ok(report)
    }

    fn summary(&self, chunks_total: usize, total_records: usize, interrupted: bool) -> RunSummary {
        let snapshot = self.stats.snapshot();
        RunSummary {
            files_processed: snapshot.files_processed,
            chunks_processed: snapshot.chunks_processed,
            chunks_total,
            total_records,
            errors: snapshot.errors,
            elapsed: snapshot.elapsed,
            aggregation: self.aggregator.aggregation_stats(),
            pool: self.pool.stats(),
            interrupted,
        }
    }

    /// Idempotent; safe to race with a signal-driven shutdown
    pub fn shutdown(&self) -> bool {
        self.pool.shutdown()
    }
}

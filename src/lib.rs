// Core library for the chunkmill parallel file processor

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod config_file;
pub mod error;
pub mod parallel;
pub mod pipeline;
pub mod platform;
pub mod record;
pub mod splitter;
pub mod stats;
pub mod transform;

pub use aggregate::{AggregationStats, Aggregator, DedupStrategy, SortStrategy};
pub use config::{PoolConfig, ProcessorConfig};
pub use error::{ChunkError, ChunkErrorKind, PipelineError, PoolError, TaskError};
pub use parallel::{ResultCollector, SubmissionHandle, TaskHandle, WorkerPool};
pub use pipeline::{Pipeline, RunOutput, RunSummary};
pub use platform::Ctrl;
pub use record::{Chunk, ProcessedRecord};
pub use splitter::FileSplitter;
pub use stats::ProcessingStats;
pub use transform::LineTransform;

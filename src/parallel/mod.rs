//! Parallel chunk processing
//!
//! # Module Structure
//!
//! - `handle`: one-shot result handles with cooperative cancellation
//! - `pool`: bounded worker pool with caller-runs backpressure
//! - `worker`: per-chunk line transformation and batch validation
//! - `collector`: ordered, timeout-bounded draining of handles

mod collector;
mod handle;
mod pool;
mod worker;

pub use collector::{CollectionReport, ResultCollector, SubmissionHandle, DEFAULT_COLLECT_TIMEOUT};
pub use handle::{CancelToken, TaskHandle, TaskState};
pub use pool::{PoolStats, WorkerPool};
pub use worker::{validate_batch, ChunkWorker};

pub(crate) use pool::lock_recover;

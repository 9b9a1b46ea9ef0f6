//! Error types for chunk processing
//!
//! Errors are split by scope: a line failure is recovered inside the worker and
//! never surfaces here, a [`ChunkError`] discards one chunk, a [`TaskError`] is
//! what the collector sees when waiting on a handle, and [`PoolError`] /
//! [`PipelineError`] are fatal to their caller.

use std::path::PathBuf;
use std::time::Duration;

/// Why a chunk's batch was rejected
#[derive(Debug, thiserror::Error)]
pub enum ChunkErrorKind {
    #[error("record at index {index} must have a valid id")]
    InvalidId { index: usize },
    #[error("worker panicked: {0}")]
    Panicked(String),
    #[error("cancelled before completion")]
    Cancelled,
}

/// A failure scoped to one chunk; the chunk contributes no records
#[derive(Debug, thiserror::Error)]
#[error("chunk {chunk_id}: {kind}")]
pub struct ChunkError {
    pub chunk_id: String,
    #[source]
    pub kind: ChunkErrorKind,
}

impl ChunkError {
    pub fn new(chunk_id: impl Into<String>, kind: ChunkErrorKind) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            kind,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, ChunkErrorKind::Cancelled)
    }
}

/// Outcome of waiting on a [`crate::parallel::TaskHandle`] that did not yield a value
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("task was cancelled")]
    Cancelled,
    #[error("task failed: {0}")]
    Failed(#[from] ChunkError),
    #[error("task panicked: {0}")]
    Panicked(String),
    #[error("task result channel closed without a result")]
    Disconnected,
    #[error("wait interrupted by shutdown request")]
    Interrupted,
}

/// Errors raised by the worker pool itself
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("thread pool has been shut down")]
    Shutdown,
    #[error("failed to spawn worker thread")]
    Spawn(#[from] std::io::Error),
}

/// Errors that stop a run before any chunk is submitted
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("input directory does not exist or is not a directory: {}", .0.display())]
    InputDirectory(PathBuf),
    #[error("no valid files found in directory: {}", .0.display())]
    NoValidFiles(PathBuf),
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid file {}: {reason}", path.display())]
    InvalidFormat { path: PathBuf, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_error_message_carries_id() {
        let err = ChunkError::new("chunk-7", ChunkErrorKind::Panicked("boom".to_string()));
        assert_eq!(err.to_string(), "chunk chunk-7: worker panicked: boom");
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_chunk_error_exposes_cause() {
        use std::error::Error;
        let err = ChunkError::new("chunk-1", ChunkErrorKind::InvalidId { index: 3 });
        let source = err.source().expect("kind should be the source");
        assert_eq!(source.to_string(), "record at index 3 must have a valid id");
    }

    #[test]
    fn test_read_error_reports_cause_once() {
        let err = PipelineError::Read {
            path: PathBuf::from("input/a.txt"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied"),
        };
        let chained = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(chained, "failed to read input/a.txt: access denied");
    }

    #[test]
    fn test_spawn_error_reports_cause_once() {
        let err = PoolError::from(std::io::Error::new(std::io::ErrorKind::Other, "no threads left"));
        let chained = format!("{:#}", anyhow::Error::from(err));
        assert_eq!(chained, "failed to spawn worker thread: no threads left");
    }

    #[test]
    fn test_task_error_wraps_chunk_error() {
        let err: TaskError = ChunkError::new("chunk-2", ChunkErrorKind::Cancelled).into();
        assert!(matches!(err, TaskError::Failed(ref c) if c.is_cancelled()));
        assert!(err.to_string().contains("chunk-2"));
    }
}

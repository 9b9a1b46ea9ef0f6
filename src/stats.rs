use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-wide counters shared by the splitter, workers and collector.
///
/// Counters only ever increase. Reads are relaxed snapshots, not transactional.
#[derive(Debug)]
pub struct ProcessingStats {
    files_processed: AtomicU64,
    chunks_processed: AtomicU64,
    total_records: AtomicU64,
    errors: AtomicU64,
    start_time: Instant,
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self {
            files_processed: AtomicU64::new(0),
            chunks_processed: AtomicU64::new(0),
            total_records: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn add_file_processed(&self) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_chunk_processed(&self) {
        self.chunks_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_records(&self, count: u64) {
        self.total_records.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn files_processed(&self) -> u64 {
        self.files_processed.load(Ordering::Relaxed)
    }

    pub fn chunks_processed(&self) -> u64 {
        self.chunks_processed.load(Ordering::Relaxed)
    }

    pub fn total_records(&self) -> u64 {
        self.total_records.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            files_processed: self.files_processed(),
            chunks_processed: self.chunks_processed(),
            total_records: self.total_records(),
            errors: self.errors(),
            elapsed: self.elapsed(),
        }
    }
}

/// Point-in-time copy of [`ProcessingStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub files_processed: u64,
    pub chunks_processed: u64,
    pub total_records: u64,
    pub errors: u64,
    pub elapsed: Duration,
}

impl StatsSnapshot {
    pub fn records_per_sec(&self) -> Option<f64> {
        let millis = self.elapsed.as_millis();
        if millis == 0 || self.total_records == 0 {
            return None;
        }
        Some(self.total_records as f64 * 1000.0 / millis as f64)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Files: {}, chunks: {}, records: {}",
            self.files_processed, self.chunks_processed, self.total_records
        )?;

        if self.errors > 0 {
            write!(f, ", {} errors", self.errors)?;
        }

        write!(f, " in {}ms", self.elapsed.as_millis())?;

        if let Some(rate) = self.records_per_sec() {
            write!(f, " ({:.0} records/s)", rate)?;
        }

        Ok(())
    }
}

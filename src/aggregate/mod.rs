//! Thread-safe aggregation of processed records
//!
//! # Module Structure
//!
//! - `dedup`: duplicate removal strategies
//! - `sort`: stable sort strategies
//!
//! The [`Aggregator`] holds every merged record behind one lock, so a batch is
//! appended all at once and readers never see half of it. Post-processing
//! (dedup, then sort) works on a snapshot taken under that lock.

mod dedup;
mod sort;

pub use dedup::{count_unique, remove_duplicates, DedupStrategy};
pub use sort::{sort_records, RecordComparator, SortStrategy};

use std::fmt;
use std::sync::Mutex;
use tracing::debug;

use crate::parallel::lock_recover;
use crate::record::ProcessedRecord;

#[derive(Debug, Default)]
struct AggregationState {
    records: Vec<ProcessedRecord>,
    processed_batches: usize,
}

/// Aggregation counters at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationStats {
    pub total_records: usize,
    pub processed_batches: usize,
    pub unique_records: usize,
}

impl AggregationStats {
    pub fn duplicate_count(&self) -> usize {
        self.total_records - self.unique_records
    }
}

impl fmt::Display for AggregationStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AggregationStats{{totalRecords={}, processedTasks={}, uniqueRecords={}, duplicates={}}}",
            self.total_records,
            self.processed_batches,
            self.unique_records,
            self.duplicate_count()
        )
    }
}

/// Accumulates record batches from every chunk of a run
#[derive(Debug)]
pub struct Aggregator {
    state: Mutex<AggregationState>,
    dedup: Option<DedupStrategy>,
    sort: Option<SortStrategy>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl Aggregator {
    /// `dedup` / `sort` of `None` disable that post-processing step
    pub fn new(dedup: Option<DedupStrategy>, sort: Option<SortStrategy>) -> Self {
        Self {
            state: Mutex::new(AggregationState::default()),
            dedup,
            sort,
        }
    }

    pub fn dedup_strategy(&self) -> Option<DedupStrategy> {
        self.dedup
    }

    pub fn sort_strategy(&self) -> Option<&SortStrategy> {
        self.sort.as_ref()
    }

    /// Append a whole batch. Empty batches are ignored and not counted.
    pub fn merge(&self, batch: &[ProcessedRecord]) {
        if batch.is_empty() {
            return;
        }

        let mut state = lock_recover(&self.state);
        state.records.extend_from_slice(batch);
        state.processed_batches += 1;

        debug!(
            added = batch.len(),
            total = state.records.len(),
            batches = state.processed_batches,
            "aggregated batch"
        );
    }

    /// Snapshot of all merged records with dedup then sort applied as configured
    pub fn final_results(&self) -> Vec<ProcessedRecord> {
        let mut results = lock_recover(&self.state).records.clone();

        if let Some(strategy) = self.dedup {
            results = remove_duplicates(&results, strategy);
        }

        if let Some(strategy) = &self.sort {
            results = sort_records(&results, strategy);
        }

        results
    }

    pub fn aggregation_stats(&self) -> AggregationStats {
        let state = lock_recover(&self.state);
        let total_records = state.records.len();
        let unique_records = match self.dedup {
            Some(strategy) => count_unique(&state.records, strategy),
            None => total_records,
        };
        AggregationStats {
            total_records,
            processed_batches: state.processed_batches,
            unique_records,
        }
    }

    pub fn total_records(&self) -> usize {
        lock_recover(&self.state).records.len()
    }

    pub fn processed_batches(&self) -> usize {
        lock_recover(&self.state).processed_batches
    }

    /// Clear everything. Only meant for use between independent runs.
    pub fn reset(&self) {
        let mut state = lock_recover(&self.state);
        state.records.clear();
        state.processed_batches = 0;
    }
}

//! Stable sorting strategies for processed records

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::record::ProcessedRecord;

pub type RecordComparator = Arc<dyn Fn(&ProcessedRecord, &ProcessedRecord) -> Ordering + Send + Sync>;

/// How to order the final result set
#[derive(Clone, Default)]
pub enum SortStrategy {
    /// By id, ascending
    #[default]
    Natural,
    TimestampAsc,
    TimestampDesc,
    ContentAsc,
    ContentDesc,
    /// Caller-supplied ordering
    Custom(RecordComparator),
}

impl SortStrategy {
    pub fn custom<F>(compare: F) -> Self
    where
        F: Fn(&ProcessedRecord, &ProcessedRecord) -> Ordering + Send + Sync + 'static,
    {
        SortStrategy::Custom(Arc::new(compare))
    }

    fn compare(&self, a: &ProcessedRecord, b: &ProcessedRecord) -> Ordering {
        match self {
            SortStrategy::Natural => a.cmp(b),
            SortStrategy::TimestampAsc => a.created_at.cmp(&b.created_at),
            SortStrategy::TimestampDesc => b.created_at.cmp(&a.created_at),
            SortStrategy::ContentAsc => a.content.cmp(&b.content),
            SortStrategy::ContentDesc => b.content.cmp(&a.content),
            SortStrategy::Custom(compare) => compare(a, b),
        }
    }
}

impl fmt::Debug for SortStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortStrategy::Natural => f.write_str("Natural"),
            SortStrategy::TimestampAsc => f.write_str("TimestampAsc"),
            SortStrategy::TimestampDesc => f.write_str("TimestampDesc"),
            SortStrategy::ContentAsc => f.write_str("ContentAsc"),
            SortStrategy::ContentDesc => f.write_str("ContentDesc"),
            SortStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Return a sorted copy; equal elements keep their input order
pub fn sort_records(records: &[ProcessedRecord], strategy: &SortStrategy) -> Vec<ProcessedRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by(|a, b| strategy.compare(a, b));
    if !sorted.is_empty() {
        info!(count = sorted.len(), ?strategy, "sorted records");
    }
    sorted
}

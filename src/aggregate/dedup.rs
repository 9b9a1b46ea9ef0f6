//! Duplicate removal preserving first-seen order

use indexmap::IndexSet;
use tracing::info;

use crate::record::ProcessedRecord;

/// Which fields make two records duplicates
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DedupStrategy {
    /// Same id
    #[default]
    Id,
    /// Same content
    Content,
    /// Same id and same content
    Complete,
}

/// Keep the first occurrence of every key, dropping later ones
pub fn remove_duplicates(
    records: &[ProcessedRecord],
    strategy: DedupStrategy,
) -> Vec<ProcessedRecord> {
    if records.is_empty() {
        return Vec::new();
    }

    let unique: Vec<ProcessedRecord> = match strategy {
        DedupStrategy::Id => keep_first(records, |r| r.id.as_str()),
        DedupStrategy::Content => keep_first(records, |r| r.content.as_str()),
        DedupStrategy::Complete => keep_first(records, |r| (r.id.as_str(), r.content.as_str())),
    };

    info!(
        removed = records.len() - unique.len(),
        original = records.len(),
        unique = unique.len(),
        ?strategy,
        "removed duplicates"
    );
    unique
}

/// Number of records that would survive [`remove_duplicates`]
pub fn count_unique(records: &[ProcessedRecord], strategy: DedupStrategy) -> usize {
    match strategy {
        DedupStrategy::Id => records.iter().map(|r| r.id.as_str()).collect::<IndexSet<_>>().len(),
        DedupStrategy::Content => records
            .iter()
            .map(|r| r.content.as_str())
            .collect::<IndexSet<_>>()
            .len(),
        DedupStrategy::Complete => records
            .iter()
            .map(|r| (r.id.as_str(), r.content.as_str()))
            .collect::<IndexSet<_>>()
            .len(),
    }
}

fn keep_first<'a, K, F>(records: &'a [ProcessedRecord], key: F) -> Vec<ProcessedRecord>
where
    K: std::hash::Hash + Eq,
    F: Fn(&'a ProcessedRecord) -> K,
{
    let mut seen = IndexSet::with_capacity(records.len());
    records
        .iter()
        .filter(|record| seen.insert(key(*record)))
        .cloned()
        .collect()
}

use std::hint::black_box;

use chrono::{TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use chunkmill::aggregate::{remove_duplicates, sort_records};
use chunkmill::record::record_id;
use chunkmill::{Aggregator, DedupStrategy, ProcessedRecord, SortStrategy};

fn records(count: usize, distinct: usize) -> Vec<ProcessedRecord> {
    (0..count)
        .map(|i| {
            let line = i % distinct;
            ProcessedRecord::with_timestamp(
                record_id("bench.txt", line + 1, &format!("payload {}", line)),
                format!("[bench.txt:{}] payload {}", line + 1, line),
                Utc.timestamp_opt((count - i) as i64, 0).unwrap(),
            )
        })
        .collect()
}

fn bench_dedup(c: &mut Criterion) {
    let input = records(50_000, 20_000);
    for (name, strategy) in [
        ("dedup_id", DedupStrategy::Id),
        ("dedup_content", DedupStrategy::Content),
        ("dedup_complete", DedupStrategy::Complete),
    ] {
        c.bench_function(name, |b| {
            b.iter(|| black_box(remove_duplicates(black_box(&input), strategy)));
        });
    }
}

fn bench_sort(c: &mut Criterion) {
    let input = records(50_000, 50_000);
    c.bench_function("sort_natural", |b| {
        b.iter(|| black_box(sort_records(black_box(&input), &SortStrategy::Natural)));
    });
    c.bench_function("sort_timestamp_desc", |b| {
        b.iter(|| black_box(sort_records(black_box(&input), &SortStrategy::TimestampDesc)));
    });
}

fn bench_merge_and_finalize(c: &mut Criterion) {
    let batches: Vec<Vec<ProcessedRecord>> = records(50_000, 40_000)
        .chunks(1000)
        .map(|b| b.to_vec())
        .collect();

    c.bench_function("merge_50_batches_then_finalize", |b| {
        b.iter_batched(
            || Aggregator::new(Some(DedupStrategy::Id), Some(SortStrategy::Natural)),
            |aggregator| {
                for batch in &batches {
                    aggregator.merge(batch);
                }
                black_box(aggregator.final_results())
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_dedup, bench_sort, bench_merge_and_finalize);
criterion_main!(benches);

#![no_main]

use std::sync::Arc;

use chunkmill::parallel::{validate_batch, WorkerPool};
use chunkmill::splitter::split_lines;
use chunkmill::{Aggregator, DedupStrategy, LineTransform, PoolConfig, ProcessingStats, SortStrategy};
use libfuzzer_sys::fuzz_target;

const MAX_LINES: usize = 256;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    let chunk_size = (data[0] as usize % 32) + 1;
    let transform_tag = data[1];
    let text = String::from_utf8_lossy(&data[2..]);
    let lines: Vec<String> = text.lines().take(MAX_LINES).map(str::to_string).collect();
    let total = lines.len();

    let chunks = split_lines("fuzz.txt", lines, chunk_size);
    assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), total);

    let transform = match transform_tag % 4 {
        0 => LineTransform::default(),
        1 => LineTransform::uppercase().and_then(LineTransform::add_line_number()),
        2 => LineTransform::lowercase(),
        _ => LineTransform::identity(),
    };

    let pool = match WorkerPool::new(PoolConfig::with_core_threads(2)) {
        Ok(pool) => pool,
        Err(_) => return,
    };
    let stats = Arc::new(ProcessingStats::new());
    let aggregator = Aggregator::new(Some(DedupStrategy::Complete), Some(SortStrategy::Natural));

    let mut handles = Vec::new();
    for chunk in chunks {
        let worker = chunkmill::parallel::ChunkWorker::new(chunk, transform.clone(), Arc::clone(&stats));
        if let Ok(handle) = pool.submit(move |cancel| worker.run(cancel)) {
            handles.push(handle);
        }
    }

    for mut handle in handles {
        if let Ok(batch) = handle.wait_timeout(std::time::Duration::from_secs(5)) {
            assert!(validate_batch("fuzz", &batch).is_ok());
            aggregator.merge(&batch);
        }
    }
    pool.shutdown();

    let results = aggregator.final_results();
    assert!(results.len() <= total);
    assert!(results.windows(2).all(|w| w[0].id <= w[1].id));
});

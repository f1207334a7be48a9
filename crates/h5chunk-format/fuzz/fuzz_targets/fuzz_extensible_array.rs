#![no_main]
use h5chunk_format::{ChunkIndexOptions, ExtensibleArrayIndex, FileContext};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    for &offset_size in &[4u8, 8] {
        let Ok(cx) = FileContext::new(offset_size, offset_size) else {
            continue;
        };
        // Checksums would reject nearly every mutation before the geometry
        // code runs, so fuzz with verification off.
        let opts = ChunkIndexOptions::new().verify_checksums(false);
        let Ok(ea) = ExtensibleArrayIndex::open(data, cx, 0, opts) else {
            continue;
        };
        let max = ea.header().stats.max_index_set;
        for index in [0, 1, 5, 17, 100, 1000, max.saturating_sub(1), max] {
            let _ = ea.locate(index);
        }
    }
});

#![no_main]
use h5chunk_format::{ChunkIndex, ChunkIndexOptions, ChunkLocator, ChunkedStorage, FileContext};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(cx) = FileContext::new(8, 8) else {
        return;
    };
    let Ok(storage) = ChunkedStorage::from_layout_message(data, &cx) else {
        return;
    };
    // Treat the message bytes as the file too, so index roots land somewhere.
    let dims: Vec<u64> = storage.dimension_sizes.iter().map(|d| d.saturating_mul(3)).collect();
    if let Ok(idx) = ChunkIndex::open(data, cx, &storage, &dims, &dims, ChunkIndexOptions::default()) {
        for index in 0..4 {
            let _ = idx.locate(index);
        }
    }
});

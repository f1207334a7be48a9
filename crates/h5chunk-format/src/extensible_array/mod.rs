//! Extensible array chunk index (layout index type 4).
//!
//! Used for chunked datasets with a single unlimited dimension. The array
//! is a tree of at most four block kinds:
//!
//! ```text
//! EAHD header
//!  └─ EAIB index block ── inline elements
//!       ├─ data block addresses ─────────────► EADB data block [pages]
//!       └─ secondary block addresses ─► EASB ─► EADB data block [pages]
//! ```
//!
//! Only the header and index block are decoded on open; secondary blocks,
//! data blocks and pages are decoded on first use and cached per handle.

mod data_block;
mod header;
mod index;
mod index_block;
mod secondary_block;

pub use data_block::{prefix_size as data_block_prefix_size, DataBlock, DataBlockElements, DataBlockPage};
pub use header::{ExtensibleArrayHeader, ExtensibleArrayStats};
pub use index::ExtensibleArrayIndex;
pub use index_block::IndexBlock;
pub use secondary_block::SecondaryBlock;

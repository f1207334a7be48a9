//! Pure-Rust decoder for HDF5 chunk indexes.
//!
//! Given the chunked storage description of a dataset, this crate locates
//! the on-disk storage of any chunk without linking the reference C
//! library. The extensible array index (used by datasets with one
//! unlimited dimension) is decoded in full, including paged data blocks and
//! their page-initialisation bitmaps. Single-chunk, implicit, fixed array
//! and version 1 B-tree indexes are decoded as well.
//!
//! All structures are read through a [`ByteSource`], so the same code works
//! over an in-memory buffer, a memory map or a file handle.
//!
//! ```no_run
//! use h5chunk_format::{
//!     ChunkIndex, ChunkIndexOptions, ChunkLocator, ChunkedStorage, FileContext, UNLIMITED,
//! };
//!
//! # fn run(file: Vec<u8>, layout_message: &[u8]) -> h5chunk_format::Result<()> {
//! let cx = FileContext::new(8, 8)?;
//! let storage = ChunkedStorage::from_layout_message(layout_message, &cx)?;
//! let index = ChunkIndex::open(
//!     file,
//!     cx,
//!     &storage,
//!     &[1000, 64],
//!     &[UNLIMITED, 64],
//!     ChunkIndexOptions::default(),
//! )?;
//! if let Some(chunk) = index.locate_coords(&[3, 0])? {
//!     println!("chunk at {:#x}, {:?} bytes", chunk.address, chunk.size);
//! }
//! # Ok(())
//! # }
//! ```

pub mod btree_v1;
pub mod cache;
pub mod checksum;
pub mod chunk_grid;
pub mod chunk_index;
pub mod context;
pub mod cursor;
pub mod element;
pub mod error;
pub mod extensible_array;
pub mod fixed_array;
pub mod geometry;
pub mod layout;
pub mod options;
pub mod source;

pub use btree_v1::BTreeV1Index;
pub use chunk_grid::{ChunkGrid, LinearOrder, UNLIMITED};
pub use chunk_index::{ChunkIndex, ChunkIndexKind, ChunkLocator, IndexStrategy};
pub use context::FileContext;
pub use element::{ChunkLocation, ClientKind};
pub use error::{FormatError, Result, Structure};
pub use extensible_array::{ExtensibleArrayHeader, ExtensibleArrayIndex};
pub use fixed_array::FixedArrayIndex;
pub use layout::{ChunkedStorage, ExtensibleArrayParams, IndexParams};
pub use options::ChunkIndexOptions;
pub use source::ByteSource;

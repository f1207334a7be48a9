//! Chunk index dispatch: one handle type over every indexing strategy.

use core::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::btree_v1::BTreeV1Index;
use crate::chunk_grid::{ChunkGrid, LinearOrder};
use crate::context::FileContext;
use crate::element::ChunkLocation;
use crate::error::{FormatError, Result, Structure};
use crate::extensible_array::ExtensibleArrayIndex;
use crate::fixed_array::FixedArrayIndex;
use crate::layout::{ChunkedStorage, ExtensibleArrayParams, IndexParams};
use crate::options::ChunkIndexOptions;
use crate::source::ByteSource;

/// The chunk indexing strategies a chunked dataset can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkIndexKind {
    /// The dataset is stored as one chunk at the layout address.
    SingleChunk,
    /// Unfiltered chunks stored contiguously, no index structure.
    Implicit,
    /// Fixed array, for datasets with fixed maximum dimensions.
    FixedArray,
    /// Extensible array, for datasets with one unlimited dimension.
    ExtensibleArray,
    /// Version 1 B-tree, used by version 3 layout messages.
    BTreeV1,
    /// Version 2 B-tree, for datasets with several unlimited dimensions.
    BTreeV2,
}

impl ChunkIndexKind {
    /// Map a version 4 layout message index type byte.
    pub fn from_type(index_type: u8) -> Option<Self> {
        match index_type {
            1 => Some(ChunkIndexKind::SingleChunk),
            2 => Some(ChunkIndexKind::Implicit),
            3 => Some(ChunkIndexKind::FixedArray),
            4 => Some(ChunkIndexKind::ExtensibleArray),
            5 => Some(ChunkIndexKind::BTreeV2),
            _ => None,
        }
    }

    /// The layout message index type byte; `None` for the version 1 B-tree,
    /// which predates the discriminator.
    pub fn type_id(self) -> Option<u8> {
        match self {
            ChunkIndexKind::SingleChunk => Some(1),
            ChunkIndexKind::Implicit => Some(2),
            ChunkIndexKind::FixedArray => Some(3),
            ChunkIndexKind::ExtensibleArray => Some(4),
            ChunkIndexKind::BTreeV2 => Some(5),
            ChunkIndexKind::BTreeV1 => None,
        }
    }
}

impl fmt::Display for ChunkIndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChunkIndexKind::SingleChunk => "single chunk",
            ChunkIndexKind::Implicit => "implicit",
            ChunkIndexKind::FixedArray => "fixed array",
            ChunkIndexKind::ExtensibleArray => "extensible array",
            ChunkIndexKind::BTreeV1 => "version 1 B-tree",
            ChunkIndexKind::BTreeV2 => "version 2 B-tree",
        };
        f.write_str(name)
    }
}

/// Resolve linear chunk indices to storage locations.
///
/// `Ok(None)` means the chunk was never written and the caller should use
/// the dataset's fill value.
pub trait ChunkLocator {
    fn kind(&self) -> ChunkIndexKind;

    fn locate(&self, index: u64) -> Result<Option<ChunkLocation>>;
}

fn check_open(closed: &AtomicBool) -> Result<()> {
    if closed.load(Ordering::Acquire) {
        return Err(FormatError::HandleClosed);
    }
    Ok(())
}

/// The whole dataset is a single chunk.
#[derive(Debug)]
pub struct SingleChunkIndex {
    location: Option<ChunkLocation>,
    closed: AtomicBool,
}

impl SingleChunkIndex {
    pub fn new(address: Option<u64>, filtered: Option<(u64, u32)>) -> Self {
        let location = address.map(|a| match filtered {
            Some((size, mask)) => ChunkLocation::filtered(a, size, mask),
            None => ChunkLocation::unfiltered(a),
        });
        Self {
            location,
            closed: AtomicBool::new(false),
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl ChunkLocator for SingleChunkIndex {
    fn kind(&self) -> ChunkIndexKind {
        ChunkIndexKind::SingleChunk
    }

    fn locate(&self, index: u64) -> Result<Option<ChunkLocation>> {
        check_open(&self.closed)?;
        Ok(if index == 0 { self.location } else { None })
    }
}

/// Unfiltered chunks stored back to back in grid order.
#[derive(Debug)]
pub struct ImplicitIndex {
    base: Option<u64>,
    chunk_bytes: u64,
    chunk_count: u64,
    closed: AtomicBool,
}

impl ImplicitIndex {
    pub fn new(base: Option<u64>, chunk_bytes: u64, chunk_count: u64) -> Self {
        Self {
            base,
            chunk_bytes,
            chunk_count,
            closed: AtomicBool::new(false),
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl ChunkLocator for ImplicitIndex {
    fn kind(&self) -> ChunkIndexKind {
        ChunkIndexKind::Implicit
    }

    fn locate(&self, index: u64) -> Result<Option<ChunkLocation>> {
        check_open(&self.closed)?;
        if index >= self.chunk_count {
            return Ok(None);
        }
        Ok(self.base.and_then(|base| {
            index
                .checked_mul(self.chunk_bytes)
                .and_then(|off| base.checked_add(off))
                .map(ChunkLocation::unfiltered)
        }))
    }
}

impl<S: ByteSource> ChunkLocator for FixedArrayIndex<S> {
    fn kind(&self) -> ChunkIndexKind {
        ChunkIndexKind::FixedArray
    }

    fn locate(&self, index: u64) -> Result<Option<ChunkLocation>> {
        FixedArrayIndex::locate(self, index)
    }
}

impl<S: ByteSource> ChunkLocator for ExtensibleArrayIndex<S> {
    fn kind(&self) -> ChunkIndexKind {
        ChunkIndexKind::ExtensibleArray
    }

    fn locate(&self, index: u64) -> Result<Option<ChunkLocation>> {
        ExtensibleArrayIndex::locate(self, index)
    }
}

impl<S: ByteSource> ChunkLocator for BTreeV1Index<S> {
    fn kind(&self) -> ChunkIndexKind {
        ChunkIndexKind::BTreeV1
    }

    fn locate(&self, index: u64) -> Result<Option<ChunkLocation>> {
        BTreeV1Index::locate(self, index)
    }
}

/// The opened strategy behind a [`ChunkIndex`].
#[derive(Debug)]
pub enum IndexStrategy<S> {
    /// Single chunk at the layout address.
    SingleChunk(SingleChunkIndex),
    /// Contiguous unfiltered chunks.
    Implicit(ImplicitIndex),
    /// Fixed array index.
    FixedArray(FixedArrayIndex<S>),
    /// Extensible array index.
    ExtensibleArray(ExtensibleArrayIndex<S>),
    /// Version 1 B-tree index.
    BTreeV1(BTreeV1Index<S>),
    /// The layout names an array index but no storage has been allocated;
    /// every chunk is absent.
    Unallocated(ChunkIndexKind, AtomicBool),
}

/// The chunk index of one chunked dataset.
#[derive(Debug)]
pub struct ChunkIndex<S> {
    grid: ChunkGrid,
    strategy: IndexStrategy<S>,
}

impl<S: ByteSource> ChunkIndex<S> {
    /// Open the index described by `storage` for a dataset currently
    /// `dataset_dims` elements in size, growable to `max_dims`
    /// ([`UNLIMITED`](crate::chunk_grid::UNLIMITED) for unbounded dimensions).
    ///
    /// Array indexes number chunks over the maximum extent; the extensible
    /// array moves its unlimited dimension to the front first.
    pub fn open(
        source: S,
        file: FileContext,
        storage: &ChunkedStorage,
        dataset_dims: &[u64],
        max_dims: &[u64],
        options: ChunkIndexOptions,
    ) -> Result<Self> {
        let chunk_dims = &storage.dimension_sizes;
        let grid = match storage.index {
            IndexParams::Implicit | IndexParams::FixedArray { .. } => {
                ChunkGrid::with_max_dims(dataset_dims, max_dims, chunk_dims, LinearOrder::RowMajor)?
            }
            IndexParams::ExtensibleArray(_) => {
                ChunkGrid::with_max_dims(dataset_dims, max_dims, chunk_dims, LinearOrder::UnlimitedFirst)?
            }
            IndexParams::SingleChunk { .. } | IndexParams::BTreeV1 | IndexParams::BTreeV2 { .. } => {
                if max_dims.len() != dataset_dims.len() {
                    return Err(FormatError::InvalidLayout(format!(
                        "dataset rank {} does not match maximum rank {}",
                        dataset_dims.len(),
                        max_dims.len()
                    )));
                }
                ChunkGrid::new(dataset_dims, chunk_dims)?
            }
        };
        let kind = storage.kind();
        debug!(%kind, address = ?storage.address, chunks = grid.chunk_count(), "opening chunk index");

        let strategy = match (storage.index, storage.address) {
            (IndexParams::SingleChunk { filtered }, address) => {
                IndexStrategy::SingleChunk(SingleChunkIndex::new(address, filtered))
            }
            (IndexParams::Implicit, address) => IndexStrategy::Implicit(ImplicitIndex::new(
                address,
                storage.chunk_bytes(),
                grid.max_chunk_count(),
            )),
            (IndexParams::BTreeV2 { .. }, _) => {
                return Err(FormatError::UnsupportedIndex(ChunkIndexKind::BTreeV2));
            }
            (IndexParams::BTreeV1, root) => {
                IndexStrategy::BTreeV1(BTreeV1Index::open(source, file, root, grid.clone(), options)?)
            }
            (IndexParams::FixedArray { .. } | IndexParams::ExtensibleArray(_), None) => {
                IndexStrategy::Unallocated(kind, AtomicBool::new(false))
            }
            (IndexParams::FixedArray { page_bits }, Some(address)) => {
                let fa = FixedArrayIndex::open(source, file, address, options)?;
                if options.validate_back_references && fa.header().page_bits != page_bits {
                    return Err(FormatError::geometry(
                        Structure::FaHeader,
                        address,
                        format!(
                            "header page bits {} differ from layout page bits {page_bits}",
                            fa.header().page_bits
                        ),
                    ));
                }
                IndexStrategy::FixedArray(fa)
            }
            (IndexParams::ExtensibleArray(params), Some(address)) => {
                let ea = ExtensibleArrayIndex::open(source, file, address, options)?;
                if options.validate_back_references {
                    check_ea_params(&ea, &params, address)?;
                }
                IndexStrategy::ExtensibleArray(ea)
            }
        };
        Ok(Self { grid, strategy })
    }

    #[inline]
    pub fn grid(&self) -> &ChunkGrid {
        &self.grid
    }

    #[inline]
    pub fn strategy(&self) -> &IndexStrategy<S> {
        &self.strategy
    }

    /// Locate the chunk at `coords`, in chunk units.
    pub fn locate_coords(&self, coords: &[u64]) -> Result<Option<ChunkLocation>> {
        if let IndexStrategy::BTreeV1(bt) = &self.strategy {
            return bt.locate_coords(coords);
        }
        match self.grid.linearize(coords) {
            Some(index) => self.locate(index),
            None => {
                self.ensure_open()?;
                Ok(None)
            }
        }
    }

    /// Locate the chunk holding dataset element `element`.
    pub fn locate_element(&self, element: &[u64]) -> Result<Option<ChunkLocation>> {
        match self.grid.chunk_of_element(element) {
            Some(coords) => self.locate_coords(&coords),
            None => Ok(None),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(FormatError::HandleClosed);
        }
        Ok(())
    }

    /// Close the handle; later lookups fail with `HandleClosed`.
    pub fn close(&self) {
        match &self.strategy {
            IndexStrategy::SingleChunk(i) => i.close(),
            IndexStrategy::Implicit(i) => i.close(),
            IndexStrategy::FixedArray(i) => i.close(),
            IndexStrategy::ExtensibleArray(i) => i.close(),
            IndexStrategy::BTreeV1(i) => i.close(),
            IndexStrategy::Unallocated(_, closed) => closed.store(true, Ordering::Release),
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.strategy {
            IndexStrategy::SingleChunk(i) => i.closed.load(Ordering::Acquire),
            IndexStrategy::Implicit(i) => i.closed.load(Ordering::Acquire),
            IndexStrategy::FixedArray(i) => i.is_closed(),
            IndexStrategy::ExtensibleArray(i) => i.is_closed(),
            IndexStrategy::BTreeV1(i) => i.is_closed(),
            IndexStrategy::Unallocated(_, closed) => closed.load(Ordering::Acquire),
        }
    }
}

impl<S: ByteSource> ChunkLocator for ChunkIndex<S> {
    fn kind(&self) -> ChunkIndexKind {
        match &self.strategy {
            IndexStrategy::SingleChunk(i) => i.kind(),
            IndexStrategy::Implicit(i) => i.kind(),
            IndexStrategy::FixedArray(i) => ChunkLocator::kind(i),
            IndexStrategy::ExtensibleArray(i) => ChunkLocator::kind(i),
            IndexStrategy::BTreeV1(i) => ChunkLocator::kind(i),
            IndexStrategy::Unallocated(kind, _) => *kind,
        }
    }

    fn locate(&self, index: u64) -> Result<Option<ChunkLocation>> {
        match &self.strategy {
            IndexStrategy::SingleChunk(i) => i.locate(index),
            IndexStrategy::Implicit(i) => i.locate(index),
            IndexStrategy::FixedArray(i) => i.locate(index),
            IndexStrategy::ExtensibleArray(i) => i.locate(index),
            IndexStrategy::BTreeV1(i) => i.locate(index),
            IndexStrategy::Unallocated(_, closed) => {
                check_open(closed)?;
                Ok(None)
            }
        }
    }
}

fn check_ea_params<S: ByteSource>(
    ea: &ExtensibleArrayIndex<S>,
    params: &ExtensibleArrayParams,
    address: u64,
) -> Result<()> {
    let h = ea.header();
    let stored = ExtensibleArrayParams {
        max_elements_bits: h.max_elements_bits,
        index_block_elements: h.index_block_elements,
        secondary_block_min_data_blocks: h.secondary_block_min_data_blocks,
        data_block_min_elements: h.data_block_min_elements,
        max_page_elements_bits: h.max_page_elements_bits,
    };
    if stored != *params {
        warn!(address, ?stored, layout = ?params, "extensible array parameters differ from layout");
        return Err(FormatError::geometry(
            Structure::EaHeader,
            address,
            format!("header parameters {stored:?} differ from layout parameters {params:?}"),
        ));
    }
    Ok(())
}

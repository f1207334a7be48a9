//! Chunked storage description and data layout message decoding.
//!
//! Supports the chunked class of layout message versions 3 (always a
//! version 1 B-tree) and 4 (index type selected by a discriminator byte).

use crate::chunk_index::ChunkIndexKind;
use crate::context::FileContext;
use crate::cursor::Cursor;
use crate::error::{FormatError, Result, Structure};

/// Layout class value for chunked storage.
pub const LAYOUT_CLASS_CHUNKED: u8 = 2;

/// Version 4 flag: partial edge chunks are stored unfiltered.
pub const FLAG_DONT_FILTER_PARTIAL_BOUND_CHUNKS: u8 = 0x01;
/// Version 4 flag: a single-chunk index carries a filtered size and mask.
pub const FLAG_SINGLE_INDEX_WITH_FILTER: u8 = 0x02;

/// Creation parameters of an extensible array index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensibleArrayParams {
    /// log2 of the maximum number of elements.
    pub max_elements_bits: u8,
    /// Elements stored inline in the index block.
    pub index_block_elements: u8,
    /// Minimum data block pointers per secondary block.
    pub secondary_block_min_data_blocks: u8,
    /// Minimum elements per data block.
    pub data_block_min_elements: u8,
    /// log2 of the elements per data block page.
    pub max_page_elements_bits: u8,
}

/// Index-specific parameters from the layout message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexParams {
    /// The dataset is a single chunk.
    SingleChunk {
        /// `(size, filter_mask)` of a filtered chunk.
        filtered: Option<(u64, u32)>,
    },
    /// Chunks stored back to back with no index.
    Implicit,
    /// Fixed array index.
    FixedArray {
        /// log2 of the elements per data block page.
        page_bits: u8,
    },
    /// Extensible array index.
    ExtensibleArray(ExtensibleArrayParams),
    /// Version 2 B-tree index.
    BTreeV2 {
        /// Node size in bytes.
        node_size: u32,
        /// Fullness at which a node splits.
        split_percent: u8,
        /// Fullness below which siblings merge.
        merge_percent: u8,
    },
    /// Version 1 B-tree, implied by a version 3 layout message.
    BTreeV1,
}

impl IndexParams {
    pub fn kind(&self) -> ChunkIndexKind {
        match self {
            IndexParams::SingleChunk { .. } => ChunkIndexKind::SingleChunk,
            IndexParams::Implicit => ChunkIndexKind::Implicit,
            IndexParams::FixedArray { .. } => ChunkIndexKind::FixedArray,
            IndexParams::ExtensibleArray(_) => ChunkIndexKind::ExtensibleArray,
            IndexParams::BTreeV2 { .. } => ChunkIndexKind::BTreeV2,
            IndexParams::BTreeV1 => ChunkIndexKind::BTreeV1,
        }
    }
}

/// How a chunked dataset's chunks are indexed and sized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedStorage {
    /// Layout message version the description came from.
    pub version: u8,
    /// Version 4 layout flags.
    pub flags: u8,
    /// Address of the index root (or of the data, for single-chunk and
    /// implicit indexes). `None` when no storage has been allocated.
    pub address: Option<u64>,
    /// Chunk size in elements along each dataset dimension.
    pub dimension_sizes: Vec<u64>,
    /// Size of one dataset element in bytes.
    pub element_size: u64,
    /// Which index the chunks are found through, with its parameters.
    pub index: IndexParams,
}

impl ChunkedStorage {
    pub fn new(address: Option<u64>, dimension_sizes: Vec<u64>, element_size: u64, index: IndexParams) -> Self {
        let version = if matches!(index, IndexParams::BTreeV1) { 3 } else { 4 };
        let flags = match index {
            IndexParams::SingleChunk { filtered: Some(_) } => FLAG_SINGLE_INDEX_WITH_FILTER,
            _ => 0,
        };
        Self {
            version,
            flags,
            address,
            dimension_sizes,
            element_size,
            index,
        }
    }

    /// Dataset rank + 1; the extra dimension is the element size.
    pub fn dimensionality(&self) -> usize {
        self.dimension_sizes.len() + 1
    }

    #[inline]
    pub fn kind(&self) -> ChunkIndexKind {
        self.index.kind()
    }

    /// Unfiltered size of one chunk in bytes.
    pub fn chunk_bytes(&self) -> u64 {
        self.dimension_sizes
            .iter()
            .fold(self.element_size, |acc, &d| acc.saturating_mul(d))
    }

    /// Decode the body of a data layout message.
    pub fn from_layout_message(data: &[u8], file: &FileContext) -> Result<Self> {
        let mut cur = Cursor::new(data, 0, Structure::LayoutMessage);
        let version = cur.read_u8()?;
        let class = cur.read_u8()?;
        if class != LAYOUT_CLASS_CHUNKED {
            return Err(FormatError::InvalidLayout(format!(
                "layout class {class} is not chunked"
            )));
        }
        match version {
            3 => Self::decode_v3(&mut cur, file),
            4 => Self::decode_v4(&mut cur, file),
            v => Err(FormatError::UnsupportedVersion {
                structure: Structure::LayoutMessage,
                offset: 0,
                version: v,
            }),
        }
    }

    fn split_dims(mut dims: Vec<u64>) -> Result<(Vec<u64>, u64)> {
        let element_size = dims
            .pop()
            .ok_or_else(|| FormatError::InvalidLayout("layout has no dimensions".into()))?;
        if element_size == 0 || dims.contains(&0) {
            return Err(FormatError::InvalidLayout(format!(
                "zero chunk dimension in {dims:?} x {element_size}"
            )));
        }
        Ok((dims, element_size))
    }

    fn decode_v3(cur: &mut Cursor<'_>, file: &FileContext) -> Result<Self> {
        let ndims = cur.read_u8()?;
        let address = file.read_address(cur)?;
        let dims = (0..ndims)
            .map(|_| cur.read_u32().map(u64::from))
            .collect::<Result<Vec<_>>>()?;
        let (dimension_sizes, element_size) = Self::split_dims(dims)?;
        Ok(Self {
            version: 3,
            flags: 0,
            address,
            dimension_sizes,
            element_size,
            index: IndexParams::BTreeV1,
        })
    }

    fn decode_v4(cur: &mut Cursor<'_>, file: &FileContext) -> Result<Self> {
        let flags = cur.read_u8()?;
        let ndims = cur.read_u8()?;
        let width = cur.read_u8()? as usize;
        if !(1..=8).contains(&width) {
            return Err(FormatError::InvalidLayout(format!(
                "dimension size width {width} is outside 1..=8"
            )));
        }
        let dims = (0..ndims)
            .map(|_| cur.read_uint(width))
            .collect::<Result<Vec<_>>>()?;
        let (dimension_sizes, element_size) = Self::split_dims(dims)?;

        let index = match cur.read_u8()? {
            1 => {
                let filtered = if flags & FLAG_SINGLE_INDEX_WITH_FILTER != 0 {
                    let size = file.read_length(cur)?;
                    let mask = cur.read_u32()?;
                    Some((size, mask))
                } else {
                    None
                };
                IndexParams::SingleChunk { filtered }
            }
            2 => IndexParams::Implicit,
            3 => IndexParams::FixedArray {
                page_bits: cur.read_u8()?,
            },
            4 => IndexParams::ExtensibleArray(ExtensibleArrayParams {
                max_elements_bits: cur.read_u8()?,
                index_block_elements: cur.read_u8()?,
                secondary_block_min_data_blocks: cur.read_u8()?,
                data_block_min_elements: cur.read_u8()?,
                max_page_elements_bits: cur.read_u8()?,
            }),
            5 => IndexParams::BTreeV2 {
                node_size: cur.read_u32()?,
                split_percent: cur.read_u8()?,
                merge_percent: cur.read_u8()?,
            },
            other => {
                return Err(FormatError::InvalidLayout(format!(
                    "unknown chunk index type {other}"
                )))
            }
        };
        let address = file.read_address(cur)?;
        Ok(Self {
            version: 4,
            flags,
            address,
            dimension_sizes,
            element_size,
            index,
        })
    }
}

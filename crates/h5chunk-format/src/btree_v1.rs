//! Version 1 B-tree chunk index (type 1 "raw data chunk" nodes).
//!
//! Each node stores `entries_used + 1` keys interleaved with
//! `entries_used` child addresses. A key is the chunk's stored size, its
//! filter mask and the element offset of the chunk's first element in each
//! dimension (plus a trailing zero for the element-size dimension). Child
//! `i` covers chunks whose offsets fall in `[key[i], key[i + 1])`.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace, warn};

use crate::chunk_grid::ChunkGrid;
use crate::context::FileContext;
use crate::cursor::Cursor;
use crate::element::ChunkLocation;
use crate::error::{FormatError, Result, Structure};
use crate::options::ChunkIndexOptions;
use crate::source::{BlockReader, ByteSource};

/// Node type of chunk B-trees.
pub const CHUNK_NODE_TYPE: u8 = 1;

/// Deepest tree accepted before the walk is treated as a cycle.
const MAX_DEPTH: u8 = 64;

/// One key of a chunk B-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkKey {
    /// Stored size of the chunk in bytes, after filtering.
    pub chunk_size: u32,
    /// Bit `n` set means filter `n` of the pipeline was skipped.
    pub filter_mask: u32,
    /// Element offsets, one per dataset dimension plus the trailing zero.
    pub offsets: Vec<u64>,
}

/// A decoded chunk B-tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeNode {
    /// File offset of the node's signature.
    pub address: u64,
    /// 0 for leaves, whose children are chunk addresses.
    pub level: u8,
    /// `children.len() + 1` keys bracketing the children.
    pub keys: Vec<ChunkKey>,
    /// Child node addresses, or chunk addresses at level 0.
    pub children: Vec<u64>,
}

impl BTreeNode {
    /// Decode the node at `address` whose keys carry `ndims` offsets.
    pub fn decode<S: ByteSource + ?Sized>(
        reader: &BlockReader<'_, S>,
        address: u64,
        ndims: usize,
    ) -> Result<Self> {
        let file = *reader.file();
        let os = file.offset_size() as usize;
        let fixed = 8 + 2 * os;
        let head = reader.fetch(Structure::BTreeV1Node, address, 8)?;
        let mut cur = Cursor::new(&head, address, Structure::BTreeV1Node);
        cur.expect_signature()?;
        let node_type = cur.read_u8()?;
        if node_type != CHUNK_NODE_TYPE {
            return Err(FormatError::geometry(
                Structure::BTreeV1Node,
                address,
                format!("node type {node_type} is not a chunk node"),
            ));
        }
        let level = cur.read_u8()?;
        let entries = cur.read_u16()? as usize;

        let key_size = 8 + 8 * ndims;
        let size = fixed + entries * (key_size + os) + key_size;
        let image = reader.fetch(Structure::BTreeV1Node, address, size)?;
        let mut cur = Cursor::new(&image, address, Structure::BTreeV1Node);
        cur.seek(fixed)?;

        let mut keys = Vec::with_capacity(entries + 1);
        let mut children = Vec::with_capacity(entries);
        for i in 0..=entries {
            let chunk_size = cur.read_u32()?;
            let filter_mask = cur.read_u32()?;
            let offsets = (0..ndims).map(|_| cur.read_u64()).collect::<Result<Vec<_>>>()?;
            keys.push(ChunkKey {
                chunk_size,
                filter_mask,
                offsets,
            });
            if i < entries {
                children.push(file.read_offset(&mut cur)?);
            }
        }
        trace!(address, level, entries, "decoded v1 B-tree node");
        Ok(Self {
            address,
            level,
            keys,
            children,
        })
    }

    /// Index of the child whose range contains `target`, if any.
    fn child_for(&self, target: &[u64]) -> Option<usize> {
        let n = self.children.len();
        (0..n).rev().find(|&i| compare(&self.keys[i].offsets, target) != CmpOrdering::Greater)
    }
}

fn compare(a: &[u64], b: &[u64]) -> CmpOrdering {
    a.iter().cmp(b.iter())
}

/// An opened version 1 B-tree chunk index.
pub struct BTreeV1Index<S> {
    source: S,
    file: FileContext,
    options: ChunkIndexOptions,
    root: Option<u64>,
    grid: ChunkGrid,
    closed: AtomicBool,
}

impl<S> std::fmt::Debug for BTreeV1Index<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTreeV1Index")
            .field("root", &self.root)
            .field("grid", &self.grid)
            .finish_non_exhaustive()
    }
}

impl<S: ByteSource> BTreeV1Index<S> {
    pub fn open(
        source: S,
        file: FileContext,
        root: Option<u64>,
        grid: ChunkGrid,
        options: ChunkIndexOptions,
    ) -> Result<Self> {
        debug!(?root, rank = grid.rank(), "opened v1 B-tree chunk index");
        Ok(Self {
            source,
            file,
            options,
            root,
            grid,
            closed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn grid(&self) -> &ChunkGrid {
        &self.grid
    }

    /// Find where chunk `index` (row-major over the chunk grid) is stored.
    pub fn locate(&self, index: u64) -> Result<Option<ChunkLocation>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FormatError::HandleClosed);
        }
        let Some(coords) = self.grid.delinearize(index) else {
            return Ok(None);
        };
        self.locate_coords(&coords)
    }

    /// Find where the chunk at `coords` (in chunk units) is stored.
    pub fn locate_coords(&self, coords: &[u64]) -> Result<Option<ChunkLocation>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FormatError::HandleClosed);
        }
        let Some(mut address) = self.root else {
            return Ok(None);
        };
        if !self.grid.contains(coords) {
            return Ok(None);
        }
        let mut target = self.grid.element_offset(coords);
        target.push(0);
        let ndims = target.len();
        let reader = BlockReader::new(&self.source, self.file, self.options);

        let mut expected_level: Option<u8> = None;
        for _ in 0..MAX_DEPTH {
            let node = BTreeNode::decode(&reader, address, ndims)?;
            if let Some(level) = expected_level {
                if node.level != level {
                    warn!(address, found = node.level, expected = level, "B-tree level mismatch");
                    return Err(FormatError::geometry(
                        Structure::BTreeV1Node,
                        address,
                        format!("child node at level {} under a level {} parent", node.level, level + 1),
                    ));
                }
            }
            let Some(slot) = node.child_for(&target) else {
                return Ok(None);
            };
            if node.level == 0 {
                let key = &node.keys[slot];
                if key.offsets != target {
                    return Ok(None);
                }
                return Ok(Some(ChunkLocation::filtered(
                    node.children[slot],
                    u64::from(key.chunk_size),
                    key.filter_mask,
                )));
            }
            expected_level = Some(node.level - 1);
            address = node.children[slot];
        }
        Err(FormatError::geometry(
            Structure::BTreeV1Node,
            address,
            "B-tree deeper than 64 levels",
        ))
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

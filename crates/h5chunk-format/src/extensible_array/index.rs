//! Query facade over an opened extensible array.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::cache::{BlockCache, CacheStats};
use crate::context::FileContext;
use crate::element::ChunkLocation;
use crate::error::{FormatError, Result, Structure};
use crate::geometry::{self, SecondaryBlockInfo};
use crate::options::ChunkIndexOptions;
use crate::source::{BlockReader, ByteSource};

use super::{DataBlock, DataBlockPage, ExtensibleArrayHeader, IndexBlock, SecondaryBlock};

type DataBlockKey = (usize, u64);
type PageKey = (usize, u64, u64);

/// An opened extensible array chunk index.
///
/// Holds the byte source, the decoded header and index block, and a cache
/// of every secondary block, data block and page decoded so far. Lookups
/// take `&self` and may run concurrently.
pub struct ExtensibleArrayIndex<S> {
    source: S,
    file: FileContext,
    options: ChunkIndexOptions,
    header: ExtensibleArrayHeader,
    index_block: Option<IndexBlock>,
    secondary_blocks: BlockCache<usize, SecondaryBlock>,
    data_blocks: BlockCache<DataBlockKey, DataBlock>,
    pages: BlockCache<PageKey, DataBlockPage>,
    closed: AtomicBool,
}

impl<S> std::fmt::Debug for ExtensibleArrayIndex<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensibleArrayIndex")
            .field("header", &self.header.address)
            .field("secondary_blocks", &self.secondary_blocks)
            .field("data_blocks", &self.data_blocks)
            .field("pages", &self.pages)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<S: ByteSource> ExtensibleArrayIndex<S> {
    /// Decode the header at `header_address` and its index block.
    pub fn open(
        source: S,
        file: FileContext,
        header_address: u64,
        options: ChunkIndexOptions,
    ) -> Result<Self> {
        let reader = BlockReader::new(&source, file, options);
        let header = ExtensibleArrayHeader::decode(&reader, header_address)?;
        let index_block = header
            .index_block_address
            .map(|addr| IndexBlock::decode(&reader, &header, addr))
            .transpose()?;

        debug!(
            header_address,
            client = ?header.client,
            max_index_set = header.stats.max_index_set,
            has_index_block = index_block.is_some(),
            "opened extensible array index"
        );

        Ok(Self {
            source,
            file,
            options,
            header,
            index_block,
            secondary_blocks: BlockCache::new(),
            data_blocks: BlockCache::new(),
            pages: BlockCache::new(),
            closed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn header(&self) -> &ExtensibleArrayHeader {
        &self.header
    }

    /// The root index block, `None` if the array has never been written.
    #[inline]
    pub fn index_block(&self) -> Option<&IndexBlock> {
        self.index_block.as_ref()
    }

    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    fn reader(&self) -> BlockReader<'_, S> {
        BlockReader::new(&self.source, self.file, self.options)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FormatError::HandleClosed);
        }
        Ok(())
    }

    /// Find where chunk `index` is stored.
    ///
    /// Returns `Ok(None)` for chunks that were never written, including
    /// indices past the array's current extent.
    pub fn locate(&self, index: u64) -> Result<Option<ChunkLocation>> {
        self.ensure_open()?;
        let header = &self.header;
        if index >= header.stats.max_index_set {
            return Ok(None);
        }
        let Some(iblock) = &self.index_block else {
            return Ok(None);
        };

        let inline = u64::from(header.index_block_elements);
        if index < inline {
            return Ok(iblock.element(index as usize));
        }

        let rel = index - inline;
        let infos = header.secondary_block_infos();
        let Some(level) = geometry::find_level(infos, rel) else {
            return Ok(None);
        };
        let info = infos[level];
        let within_level = rel - info.element_start;
        let data_block_index = within_level / info.elements_per_data_block;
        let within_block = within_level % info.elements_per_data_block;
        trace!(index, level, data_block_index, within_block, "resolving extensible array element");

        let direct_levels = header.index_block_level_count();
        let (data_block_address, initialized) = if level < direct_levels {
            let slot = info.data_block_start + data_block_index;
            let addr = usize::try_from(slot)
                .ok()
                .and_then(|s| iblock.data_block_addresses.get(s))
                .copied()
                .flatten();
            // Data blocks owned by the index block have no page bitmap.
            (addr, true)
        } else {
            let Some(sb_addr) = iblock
                .secondary_block_addresses
                .get(level - direct_levels)
                .copied()
                .flatten()
            else {
                return Ok(None);
            };
            let sblock = self.secondary_block(level, sb_addr)?;
            let addr = usize::try_from(data_block_index)
                .ok()
                .and_then(|i| sblock.data_block_address(i));
            let page = within_block / header.page_elements();
            (addr, sblock.page_initialized(data_block_index, page))
        };
        let Some(data_block_address) = data_block_address else {
            return Ok(None);
        };
        if !initialized {
            trace!(index, level, data_block_index, "page never written");
            return Ok(None);
        }

        let dblock = self.data_block(level, data_block_index, data_block_address, &info)?;
        if !dblock.is_paged() {
            return Ok(dblock.element(within_block));
        }
        let page = within_block / header.page_elements();
        let page_data = self.page(level, data_block_index, page, &dblock)?;
        Ok(page_data.element(within_block % header.page_elements()))
    }

    /// Resolve a batch of chunk indices, stopping at the first error.
    #[cfg(not(feature = "parallel"))]
    pub fn locate_many(&self, indices: &[u64]) -> Result<Vec<Option<ChunkLocation>>> {
        indices.iter().map(|&i| self.locate(i)).collect()
    }

    /// Resolve a batch of chunk indices on the rayon pool.
    #[cfg(feature = "parallel")]
    pub fn locate_many(&self, indices: &[u64]) -> Result<Vec<Option<ChunkLocation>>> {
        use rayon::prelude::*;
        indices.par_iter().map(|&i| self.locate(i)).collect()
    }

    fn cached<K, V, F>(&self, cache: &BlockCache<K, V>, key: K, decode: F) -> Result<Arc<V>>
    where
        K: Eq + std::hash::Hash,
        F: FnOnce() -> Result<V>,
    {
        let value = cache.get_or_try_insert_with(key, || {
            self.ensure_open()?;
            decode()
        })?;
        self.ensure_open()?;
        Ok(value)
    }

    fn secondary_block(&self, level: usize, address: u64) -> Result<Arc<SecondaryBlock>> {
        self.cached(&self.secondary_blocks, level, || {
            trace!(level, address, "secondary block cache miss");
            SecondaryBlock::decode(&self.reader(), &self.header, level, address)
        })
    }

    fn data_block(
        &self,
        level: usize,
        index: u64,
        address: u64,
        info: &SecondaryBlockInfo,
    ) -> Result<Arc<DataBlock>> {
        self.cached(&self.data_blocks, (level, index), || {
            trace!(level, index, address, "data block cache miss");
            let pages = self
                .header
                .data_block_page_count(level, Structure::EaDataBlock, address)?;
            DataBlock::decode(
                &self.reader(),
                &self.header,
                address,
                info.elements_per_data_block,
                pages,
            )
        })
    }

    fn page(&self, level: usize, index: u64, page: u64, dblock: &DataBlock) -> Result<Arc<DataBlockPage>> {
        self.cached(&self.pages, (level, index, page), || {
            let address = dblock.page_address(&self.header, self.file.offset_size(), page);
            trace!(level, index, page, address, "data block page cache miss");
            DataBlockPage::decode(&self.reader(), &self.header, address)
        })
    }

    /// Number of secondary blocks, data blocks and pages decoded so far.
    pub fn cached_block_count(&self) -> usize {
        self.secondary_blocks.len() + self.data_blocks.len() + self.pages.len()
    }

    /// Combined hit/miss counters of the block caches.
    pub fn cache_stats(&self) -> CacheStats {
        [
            self.secondary_blocks.stats(),
            self.data_blocks.stats(),
            self.pages.stats(),
        ]
        .into_iter()
        .fold(CacheStats::default(), |acc, s| CacheStats {
            hits: acc.hits + s.hits,
            misses: acc.misses + s.misses,
            entries: acc.entries + s.entries,
        })
    }

    /// Close the handle: drop cached blocks and make every later (or
    /// in-flight) lookup fail with [`FormatError::HandleClosed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.secondary_blocks.close();
        self.data_blocks.close();
        self.pages.close();
        debug!(header_address = self.header.address, "closed extensible array index");
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

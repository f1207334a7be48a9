//! Fixed array chunk index (layout index type 3).
//!
//! Used for chunked datasets whose dimensions are all fixed. A header
//! (`FAHD`) points at a single data block (`FADB`) that either stores every
//! element inline or, when the array has more than `2^page_bits` elements,
//! a page-initialisation bitmap followed by checksummed pages. The last
//! page may be short.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::cache::BlockCache;
use crate::checksum::CHECKSUM_SIZE;
use crate::context::FileContext;
use crate::cursor::Cursor;
use crate::element::{ChunkLocation, ClientKind, ElementCodec};
use crate::error::{FormatError, Result, Structure};
use crate::geometry;
use crate::options::ChunkIndexOptions;
use crate::source::{BlockReader, ByteSource};

/// Decoded fixed array header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedArrayHeader {
    /// File offset of the `FAHD` signature.
    pub address: u64,
    /// What the array stores: plain or filtered chunk records.
    pub client: ClientKind,
    /// Encoded size of one element in bytes.
    pub element_size: u8,
    /// log2 of the elements per data block page.
    pub page_bits: u8,
    /// Number of elements (chunks) in the array.
    pub element_count: u64,
    /// Address of the data block; `None` until a chunk is written.
    pub data_block_address: Option<u64>,
    codec: ElementCodec,
}

impl FixedArrayHeader {
    pub fn encoded_size(offset_size: u8, length_size: u8) -> usize {
        4 + 1 + 1 + 1 + 1 + length_size as usize + offset_size as usize + CHECKSUM_SIZE
    }

    pub fn decode<S: ByteSource + ?Sized>(reader: &BlockReader<'_, S>, address: u64) -> Result<Self> {
        let file = *reader.file();
        let size = Self::encoded_size(file.offset_size(), file.length_size());
        let image = reader.fetch_block(Structure::FaHeader, address, size)?;
        let mut cur = Cursor::new(&image, address, Structure::FaHeader);
        cur.seek(5)?;

        let client_id = cur.read_u8()?;
        let element_size = cur.read_u8()?;
        let page_bits = cur.read_u8()?;
        let element_count = file.read_length(&mut cur)?;
        let data_block_address = file.read_address(&mut cur)?;

        let client = ClientKind::from_id(client_id).ok_or_else(|| {
            FormatError::geometry(Structure::FaHeader, address, format!("unknown client id {client_id}"))
        })?;
        if page_bits >= 64 {
            warn!(address, page_bits, "fixed array page bits out of range");
            return Err(FormatError::geometry(
                Structure::FaHeader,
                address,
                format!("page element bits {page_bits} out of range"),
            ));
        }
        let codec = ElementCodec::new(client, element_size, &file, Structure::FaHeader, address)?;

        Ok(Self {
            address,
            client,
            element_size,
            page_bits,
            element_count,
            data_block_address,
            codec,
        })
    }

    #[inline]
    pub fn codec(&self) -> &ElementCodec {
        &self.codec
    }

    #[inline]
    pub fn page_elements(&self) -> u64 {
        1u64 << self.page_bits
    }

    /// Number of pages, 0 when the data block is unpaged.
    #[inline]
    pub fn page_count(&self) -> u64 {
        geometry::fixed_array_page_count(self.element_count, self.page_elements())
    }

    /// Elements on page `page`; only the last page can be short.
    pub fn page_len(&self, page: u64) -> u64 {
        let start = page.saturating_mul(self.page_elements());
        self.element_count.saturating_sub(start).min(self.page_elements())
    }
}

/// Decoded fixed array data block. Paged blocks keep only their bitmap;
/// pages are fetched on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedArrayDataBlock {
    /// File offset of the `FADB` signature.
    pub address: u64,
    /// One bit per page, set when the page has been written.
    pub page_bitmap: Vec<u8>,
    /// Inline elements of an unpaged block; empty when paged.
    pub elements: Vec<Option<ChunkLocation>>,
    prefix_size: u64,
}

impl FixedArrayDataBlock {
    pub fn decode<S: ByteSource + ?Sized>(
        reader: &BlockReader<'_, S>,
        header: &FixedArrayHeader,
        address: u64,
    ) -> Result<Self> {
        let file = *reader.file();
        let pages = header.page_count();
        let bitmap_len = geometry::page_bitmap_size(pages) as usize;
        let base = 4 + 1 + 1 + file.offset_size() as usize;
        let size = if pages > 0 {
            Some(base + bitmap_len + CHECKSUM_SIZE)
        } else {
            usize::try_from(header.element_count)
                .ok()
                .and_then(|n| n.checked_mul(header.codec().element_size()))
                .and_then(|n| n.checked_add(base + CHECKSUM_SIZE))
        };
        let size = size.ok_or_else(|| {
            FormatError::geometry(Structure::FaDataBlock, address, "data block is too large to address")
        })?;

        let image = reader.fetch_block(Structure::FaDataBlock, address, size)?;
        let mut cur = Cursor::new(&image, address, Structure::FaDataBlock);
        cur.seek(5)?;
        reader.check_owner(&mut cur, header.client.id(), header.address, Structure::FaDataBlock, address)?;

        let (page_bitmap, elements) = if pages > 0 {
            (cur.read_bytes(bitmap_len)?.to_vec(), Vec::new())
        } else {
            let elems = header
                .codec()
                .decode_many(&mut cur, &file, header.element_count as usize)?;
            (Vec::new(), elems)
        };
        trace!(address, pages, "decoded fixed array data block");

        Ok(Self {
            address,
            page_bitmap,
            elements,
            prefix_size: size as u64,
        })
    }

    /// File address of page `page`.
    pub fn page_address(&self, header: &FixedArrayHeader, page: u64) -> u64 {
        let page_size = header.codec().page_size(header.page_elements());
        self.address
            .saturating_add(self.prefix_size)
            .saturating_add(page.saturating_mul(page_size))
    }
}

/// An opened fixed array chunk index.
pub struct FixedArrayIndex<S> {
    source: S,
    file: FileContext,
    options: ChunkIndexOptions,
    header: FixedArrayHeader,
    data_block: Option<FixedArrayDataBlock>,
    pages: BlockCache<u64, Vec<Option<ChunkLocation>>>,
    closed: AtomicBool,
}

impl<S> std::fmt::Debug for FixedArrayIndex<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedArrayIndex")
            .field("header", &self.header)
            .field("pages", &self.pages)
            .finish_non_exhaustive()
    }
}

impl<S: ByteSource> FixedArrayIndex<S> {
    /// Decode the header at `header_address` and its data block.
    pub fn open(
        source: S,
        file: FileContext,
        header_address: u64,
        options: ChunkIndexOptions,
    ) -> Result<Self> {
        let reader = BlockReader::new(&source, file, options);
        let header = FixedArrayHeader::decode(&reader, header_address)?;
        let data_block = header
            .data_block_address
            .map(|addr| FixedArrayDataBlock::decode(&reader, &header, addr))
            .transpose()?;
        debug!(
            header_address,
            elements = header.element_count,
            pages = header.page_count(),
            "opened fixed array index"
        );
        Ok(Self {
            source,
            file,
            options,
            header,
            data_block,
            pages: BlockCache::new(),
            closed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn header(&self) -> &FixedArrayHeader {
        &self.header
    }

    #[inline]
    pub fn data_block(&self) -> Option<&FixedArrayDataBlock> {
        self.data_block.as_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(FormatError::HandleClosed);
        }
        Ok(())
    }

    /// Find where chunk `index` is stored.
    pub fn locate(&self, index: u64) -> Result<Option<ChunkLocation>> {
        self.ensure_open()?;
        if index >= self.header.element_count {
            return Ok(None);
        }
        let Some(dblock) = &self.data_block else {
            return Ok(None);
        };
        if self.header.page_count() == 0 {
            return Ok(usize::try_from(index)
                .ok()
                .and_then(|i| dblock.elements.get(i))
                .copied()
                .flatten());
        }

        let page = index >> self.header.page_bits;
        if !geometry::bit_is_set(&dblock.page_bitmap, page) {
            trace!(index, page, "fixed array page never written");
            return Ok(None);
        }
        let elements = self.page(page, dblock)?;
        let within = index & (self.header.page_elements() - 1);
        Ok(usize::try_from(within)
            .ok()
            .and_then(|i| elements.get(i))
            .copied()
            .flatten())
    }

    fn page(&self, page: u64, dblock: &FixedArrayDataBlock) -> Result<Arc<Vec<Option<ChunkLocation>>>> {
        let value = self.pages.get_or_try_insert_with(page, || {
            self.ensure_open()?;
            let address = dblock.page_address(&self.header, page);
            trace!(page, address, "fixed array page cache miss");
            let reader = BlockReader::new(&self.source, self.file, self.options);
            self.header.codec().read_page(
                &reader,
                Structure::FaDataBlockPage,
                address,
                self.header.page_len(page) as usize,
            )
        })?;
        self.ensure_open()?;
        Ok(value)
    }

    pub fn cached_block_count(&self) -> usize {
        self.pages.len()
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.pages.close();
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

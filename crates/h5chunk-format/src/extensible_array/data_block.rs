//! Extensible array data blocks (`EADB`) and their pages.

use tracing::trace;

use crate::checksum::CHECKSUM_SIZE;
use crate::cursor::Cursor;
use crate::element::ChunkLocation;
use crate::error::{FormatError, Result, Structure};
use crate::source::{BlockReader, ByteSource};

use super::ExtensibleArrayHeader;

/// Element storage of a data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataBlockElements {
    /// All elements are stored inline, covered by the block's checksum.
    Unpaged(Vec<Option<ChunkLocation>>),
    /// Elements live in `page_count` separately checksummed pages that
    /// follow the block prefix; they are decoded on demand.
    Paged { page_count: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlock {
    /// File offset of the `EADB` signature.
    pub address: u64,
    /// Array index of the first element, not counting the index block's
    /// inline elements.
    pub block_offset: u64,
    /// Elements the block covers.
    pub element_count: u64,
    /// Inline elements, or the page count of a paged block.
    pub elements: DataBlockElements,
}

/// Size of the data block prefix: everything up to and including the first
/// checksum when the block is paged.
pub fn prefix_size(header: &ExtensibleArrayHeader, offset_size: u8) -> usize {
    4 + 1 + 1 + offset_size as usize + header.array_offset_size() + CHECKSUM_SIZE
}

impl DataBlock {
    /// Decode the data block at `address` holding `element_count` elements
    /// split into `page_count` pages (0 for an unpaged block).
    pub fn decode<S: ByteSource + ?Sized>(
        reader: &BlockReader<'_, S>,
        header: &ExtensibleArrayHeader,
        address: u64,
        element_count: u64,
        page_count: u64,
    ) -> Result<Self> {
        let file = *reader.file();
        let codec = header.codec();
        let prefix = prefix_size(header, file.offset_size());
        let size = if page_count > 0 {
            Some(prefix)
        } else {
            usize::try_from(element_count)
                .ok()
                .and_then(|n| n.checked_mul(codec.element_size()))
                .and_then(|n| n.checked_add(prefix))
        };
        let size = size.ok_or_else(|| {
            FormatError::geometry(
                Structure::EaDataBlock,
                address,
                format!("data block of {element_count} elements is too large to address"),
            )
        })?;

        let image = reader.fetch_block(Structure::EaDataBlock, address, size)?;
        let mut cur = Cursor::new(&image, address, Structure::EaDataBlock);
        cur.seek(5)?;
        reader.check_owner(&mut cur, header.client.id(), header.address, Structure::EaDataBlock, address)?;
        let block_offset = cur.read_uint(header.array_offset_size())?;

        let elements = if page_count > 0 {
            DataBlockElements::Paged { page_count }
        } else {
            DataBlockElements::Unpaged(codec.decode_many(&mut cur, &file, element_count as usize)?)
        };

        trace!(address, block_offset, element_count, page_count, "decoded extensible array data block");

        Ok(Self {
            address,
            block_offset,
            element_count,
            elements,
        })
    }

    #[inline]
    pub fn is_paged(&self) -> bool {
        matches!(self.elements, DataBlockElements::Paged { .. })
    }

    /// Element `index` of an unpaged block; `None` for paged blocks, unset
    /// elements, or indices past the end.
    pub fn element(&self, index: u64) -> Option<ChunkLocation> {
        match &self.elements {
            DataBlockElements::Unpaged(elems) => {
                usize::try_from(index).ok().and_then(|i| elems.get(i)).copied().flatten()
            }
            DataBlockElements::Paged { .. } => None,
        }
    }

    /// File address of page `page` of a paged block.
    pub fn page_address(&self, header: &ExtensibleArrayHeader, offset_size: u8, page: u64) -> u64 {
        self.address
            .saturating_add(prefix_size(header, offset_size) as u64)
            .saturating_add(page.saturating_mul(header.page_size()))
    }
}

/// One decoded page of a paged data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBlockPage {
    /// File offset of the page's first element.
    pub address: u64,
    /// Decoded elements; `None` marks an unwritten chunk.
    pub elements: Vec<Option<ChunkLocation>>,
}

impl DataBlockPage {
    pub fn decode<S: ByteSource + ?Sized>(
        reader: &BlockReader<'_, S>,
        header: &ExtensibleArrayHeader,
        address: u64,
    ) -> Result<Self> {
        let elements = header.codec().read_page(
            reader,
            Structure::EaDataBlockPage,
            address,
            header.page_elements() as usize,
        )?;
        trace!(address, elements = elements.len(), "decoded extensible array data block page");
        Ok(Self { address, elements })
    }

    pub fn element(&self, index: u64) -> Option<ChunkLocation> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.elements.get(i))
            .copied()
            .flatten()
    }
}

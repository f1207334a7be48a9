//! Extensible array secondary block (`EASB`).
//!
//! A secondary block holds the data block addresses of one growth level
//! beyond those addressed directly by the index block. When that level's
//! data blocks are paged it also carries a page-initialisation bitmap.

use tracing::trace;

use crate::checksum::CHECKSUM_SIZE;
use crate::cursor::Cursor;
use crate::error::{FormatError, Result, Structure};
use crate::geometry;
use crate::source::{BlockReader, ByteSource};

use super::ExtensibleArrayHeader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryBlock {
    /// File address of this block.
    pub address: u64,
    /// Growth level the block belongs to.
    pub level: usize,
    /// Array index of the block's first element, not counting the index
    /// block's inline elements.
    pub block_offset: u64,
    /// Pages per data block; 0 when the level is unpaged.
    pub page_count: u64,
    /// `ceil(page_count / 8)` bytes per data block, empty when unpaged.
    pub page_bitmap: Vec<u8>,
    /// Addresses of the data blocks this block owns, in order.
    pub data_block_addresses: Vec<Option<u64>>,
}

impl SecondaryBlock {
    /// Encoded size of a secondary block on `level`.
    pub fn encoded_size(header: &ExtensibleArrayHeader, level: usize, offset_size: u8) -> Result<usize> {
        let info = header.level(level, Structure::EaSecondaryBlock, header.address)?;
        let pages = header.data_block_page_count(level, Structure::EaSecondaryBlock, header.address)?;
        let bitmap = geometry::secondary_block_bitmap_size(pages, info.data_block_count);
        let os = offset_size as u64;
        let size = (4 + 1 + 1 + os + header.array_offset_size() as u64)
            .checked_add(bitmap)
            .and_then(|n| n.checked_add(info.data_block_count.checked_mul(os)?))
            .and_then(|n| n.checked_add(CHECKSUM_SIZE as u64))
            .and_then(|n| usize::try_from(n).ok());
        size.ok_or_else(|| {
            FormatError::geometry(
                Structure::EaSecondaryBlock,
                header.address,
                format!("secondary block on level {level} is too large to address"),
            )
        })
    }

    pub fn decode<S: ByteSource + ?Sized>(
        reader: &BlockReader<'_, S>,
        header: &ExtensibleArrayHeader,
        level: usize,
        address: u64,
    ) -> Result<Self> {
        let file = *reader.file();
        let info = *header.level(level, Structure::EaSecondaryBlock, address)?;
        let page_count = header.data_block_page_count(level, Structure::EaSecondaryBlock, address)?;
        let size = Self::encoded_size(header, level, file.offset_size())?;

        let image = reader.fetch_block(Structure::EaSecondaryBlock, address, size)?;
        let mut cur = Cursor::new(&image, address, Structure::EaSecondaryBlock);
        cur.seek(5)?;
        reader.check_owner(&mut cur, header.client.id(), header.address, Structure::EaSecondaryBlock, address)?;

        let block_offset = cur.read_uint(header.array_offset_size())?;
        let page_bitmap = if page_count > 0 {
            let len = geometry::secondary_block_bitmap_size(page_count, info.data_block_count);
            cur.read_bytes(len as usize)?.to_vec()
        } else {
            Vec::new()
        };
        let data_block_addresses = (0..info.data_block_count)
            .map(|_| file.read_address(&mut cur))
            .collect::<Result<Vec<_>>>()?;

        trace!(
            address,
            level,
            block_offset,
            page_count,
            data_blocks = data_block_addresses.len(),
            "decoded extensible array secondary block"
        );

        Ok(Self {
            address,
            level,
            block_offset,
            page_count,
            page_bitmap,
            data_block_addresses,
        })
    }

    #[inline]
    pub fn is_paged(&self) -> bool {
        self.page_count > 0
    }

    /// Address of data block `index` within this block.
    pub fn data_block_address(&self, index: usize) -> Option<u64> {
        self.data_block_addresses.get(index).copied().flatten()
    }

    /// Whether page `page` of data block `data_block` has ever been written.
    ///
    /// Bits are numbered continuously across data blocks
    /// (`data_block * page_count + page`). Always true for unpaged levels.
    pub fn page_initialized(&self, data_block: u64, page: u64) -> bool {
        if !self.is_paged() {
            return true;
        }
        let bit = data_block
            .checked_mul(self.page_count)
            .and_then(|b| b.checked_add(page));
        bit.is_some_and(|bit| geometry::bit_is_set(&self.page_bitmap, bit))
    }
}

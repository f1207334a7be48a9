//! Extensible array index block (`EAIB`), the root of the array.

use tracing::trace;

use crate::checksum::CHECKSUM_SIZE;
use crate::cursor::Cursor;
use crate::element::ChunkLocation;
use crate::error::{Result, Structure};
use crate::source::{BlockReader, ByteSource};

use super::ExtensibleArrayHeader;

/// Decoded index block: inline elements plus the address tables of the
/// data blocks and secondary blocks reachable from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBlock {
    /// File offset of the `EAIB` signature.
    pub address: u64,
    /// The first `index_block_elements` elements of the array.
    pub elements: Vec<Option<ChunkLocation>>,
    /// Data blocks of the levels addressed directly from the index block.
    pub data_block_addresses: Vec<Option<u64>>,
    /// One secondary block per remaining level.
    pub secondary_block_addresses: Vec<Option<u64>>,
}

impl IndexBlock {
    /// Encoded size of the index block described by `header`.
    pub fn encoded_size(header: &ExtensibleArrayHeader, offset_size: u8) -> usize {
        let os = offset_size as usize;
        4 + 1
            + 1
            + os
            + header.index_block_elements as usize * header.codec().element_size()
            + header.index_block_data_block_count() * os
            + header.index_block_secondary_block_count() * os
            + CHECKSUM_SIZE
    }

    pub fn decode<S: ByteSource + ?Sized>(
        reader: &BlockReader<'_, S>,
        header: &ExtensibleArrayHeader,
        address: u64,
    ) -> Result<Self> {
        let file = *reader.file();
        let size = Self::encoded_size(header, file.offset_size());
        let image = reader.fetch_block(Structure::EaIndexBlock, address, size)?;
        let mut cur = Cursor::new(&image, address, Structure::EaIndexBlock);
        cur.seek(5)?;
        reader.check_owner(&mut cur, header.client.id(), header.address, Structure::EaIndexBlock, address)?;

        let elements = header
            .codec()
            .decode_many(&mut cur, &file, header.index_block_elements as usize)?;
        let data_block_addresses = (0..header.index_block_data_block_count())
            .map(|_| file.read_address(&mut cur))
            .collect::<Result<Vec<_>>>()?;
        let secondary_block_addresses = (0..header.index_block_secondary_block_count())
            .map(|_| file.read_address(&mut cur))
            .collect::<Result<Vec<_>>>()?;

        trace!(
            address,
            inline = elements.len(),
            data_blocks = data_block_addresses.len(),
            secondary_blocks = secondary_block_addresses.len(),
            "decoded extensible array index block"
        );

        Ok(Self {
            address,
            elements,
            data_block_addresses,
            secondary_block_addresses,
        })
    }

    /// Inline element `index`, `None` when unset or out of range.
    pub fn element(&self, index: usize) -> Option<ChunkLocation> {
        self.elements.get(index).copied().flatten()
    }
}

//! Extensible array header (`EAHD`).

use tracing::{trace, warn};

use crate::checksum::CHECKSUM_SIZE;
use crate::cursor::Cursor;
use crate::element::{ClientKind, ElementCodec};
use crate::error::{FormatError, Result, Structure};
use crate::geometry::{self, SecondaryBlockInfo};
use crate::source::{BlockReader, ByteSource};

/// Statistics stored in the header. They describe how much of the array
/// has been allocated so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtensibleArrayStats {
    /// Secondary blocks created.
    pub secondary_block_count: u64,
    /// Total bytes of secondary blocks.
    pub secondary_block_size: u64,
    /// Data blocks created.
    pub data_block_count: u64,
    /// Total bytes of data blocks.
    pub data_block_size: u64,
    /// One past the highest element index ever set.
    pub max_index_set: u64,
    /// Elements realized (allocated) in the array.
    pub element_count: u64,
}

/// Decoded extensible array header plus its derived geometry.
///
/// The growth table is computed once here and never changes afterwards.
#[derive(Debug, Clone)]
pub struct ExtensibleArrayHeader {
    /// File address of this header.
    pub address: u64,
    /// What the array stores: plain or filtered chunk records.
    pub client: ClientKind,
    /// Encoded size of each element.
    pub element_size: u8,
    /// log2 of the maximum number of elements the array can hold.
    pub max_elements_bits: u8,
    /// Elements stored inline in the index block.
    pub index_block_elements: u8,
    /// Elements in the smallest data block.
    pub data_block_min_elements: u8,
    /// Data blocks in the smallest secondary block.
    pub secondary_block_min_data_blocks: u8,
    /// log2 of the number of elements per data block page.
    pub max_page_elements_bits: u8,
    /// Allocation statistics kept by the writer.
    pub stats: ExtensibleArrayStats,
    /// `None` when no index block has been allocated yet.
    pub index_block_address: Option<u64>,
    codec: ElementCodec,
    secondary_blocks: Vec<SecondaryBlockInfo>,
    page_elements: u64,
}

impl ExtensibleArrayHeader {
    /// Encoded header size for the given file widths.
    pub fn encoded_size(offset_size: u8, length_size: u8) -> usize {
        4 + 1 + 1 + 1 + 5 + 6 * length_size as usize + offset_size as usize + CHECKSUM_SIZE
    }

    /// Decode the header at `address`.
    pub fn decode<S: ByteSource + ?Sized>(reader: &BlockReader<'_, S>, address: u64) -> Result<Self> {
        let file = *reader.file();
        let size = Self::encoded_size(file.offset_size(), file.length_size());
        let image = reader.fetch_block(Structure::EaHeader, address, size)?;
        let mut cur = Cursor::new(&image, address, Structure::EaHeader);
        cur.seek(5)?;

        let client_id = cur.read_u8()?;
        let element_size = cur.read_u8()?;
        let max_elements_bits = cur.read_u8()?;
        let index_block_elements = cur.read_u8()?;
        let data_block_min_elements = cur.read_u8()?;
        let secondary_block_min_data_blocks = cur.read_u8()?;
        let max_page_elements_bits = cur.read_u8()?;

        let stats = ExtensibleArrayStats {
            secondary_block_count: file.read_length(&mut cur)?,
            secondary_block_size: file.read_length(&mut cur)?,
            data_block_count: file.read_length(&mut cur)?,
            data_block_size: file.read_length(&mut cur)?,
            max_index_set: file.read_length(&mut cur)?,
            element_count: file.read_length(&mut cur)?,
        };
        let index_block_address = file.read_address(&mut cur)?;

        let client = ClientKind::from_id(client_id).ok_or_else(|| {
            FormatError::geometry(
                Structure::EaHeader,
                address,
                format!("unknown client id {client_id}"),
            )
        })?;

        let fail = |reason: String| {
            warn!(address, %reason, "rejecting extensible array header");
            FormatError::geometry(Structure::EaHeader, address, reason)
        };
        if !data_block_min_elements.is_power_of_two() {
            return Err(fail(format!(
                "minimum data block elements {data_block_min_elements} is not a power of two"
            )));
        }
        if !secondary_block_min_data_blocks.is_power_of_two() {
            return Err(fail(format!(
                "minimum secondary block data blocks {secondary_block_min_data_blocks} is not a power of two"
            )));
        }
        let min_bits = geometry::log2_of_pow2(u64::from(data_block_min_elements));
        if max_elements_bits == 0
            || max_elements_bits > 64
            || u32::from(max_elements_bits) < min_bits
        {
            return Err(fail(format!(
                "maximum element bits {max_elements_bits} out of range for minimum data block of {data_block_min_elements}"
            )));
        }
        if max_page_elements_bits >= 64 {
            return Err(fail(format!(
                "page element bits {max_page_elements_bits} out of range"
            )));
        }

        let codec = ElementCodec::new(client, element_size, &file, Structure::EaHeader, address)?;
        let secondary_blocks =
            geometry::secondary_block_infos(max_elements_bits, data_block_min_elements);
        let direct_levels = geometry::index_block_level_count(secondary_block_min_data_blocks);
        if direct_levels > secondary_blocks.len() {
            return Err(fail(format!(
                "index block addresses {direct_levels} levels but the array only has {}",
                secondary_blocks.len()
            )));
        }

        trace!(
            address,
            levels = secondary_blocks.len(),
            direct_levels,
            "decoded extensible array header"
        );

        Ok(Self {
            address,
            client,
            element_size,
            max_elements_bits,
            index_block_elements,
            data_block_min_elements,
            secondary_block_min_data_blocks,
            max_page_elements_bits,
            stats,
            index_block_address,
            codec,
            secondary_blocks,
            page_elements: 1u64 << max_page_elements_bits,
        })
    }

    /// The growth table, one entry per level.
    #[inline]
    pub fn secondary_block_infos(&self) -> &[SecondaryBlockInfo] {
        &self.secondary_blocks
    }

    #[inline]
    pub fn codec(&self) -> &ElementCodec {
        &self.codec
    }

    /// Elements per data block page (`2^max_page_elements_bits`).
    #[inline]
    pub fn page_elements(&self) -> u64 {
        self.page_elements
    }

    /// Encoded size of one data block page, checksum included.
    #[inline]
    pub fn page_size(&self) -> u64 {
        self.codec.page_size(self.page_elements)
    }

    /// Width of the block offset field in secondary and data blocks.
    #[inline]
    pub fn array_offset_size(&self) -> usize {
        geometry::array_offset_size(self.max_elements_bits)
    }

    /// Levels whose data blocks are addressed from the index block.
    #[inline]
    pub fn index_block_level_count(&self) -> usize {
        geometry::index_block_level_count(self.secondary_block_min_data_blocks)
    }

    /// Data block addresses stored in the index block.
    #[inline]
    pub fn index_block_data_block_count(&self) -> usize {
        geometry::index_block_data_block_count(self.secondary_block_min_data_blocks)
    }

    /// Secondary block addresses stored in the index block.
    #[inline]
    pub fn index_block_secondary_block_count(&self) -> usize {
        self.secondary_blocks.len() - self.index_block_level_count()
    }

    /// Pages per data block on `level` (0 when unpaged).
    pub fn data_block_page_count(&self, level: usize, structure: Structure, offset: u64) -> Result<u64> {
        let info = self.level(level, structure, offset)?;
        geometry::data_block_page_count(info.elements_per_data_block, self.page_elements)
            .map_err(|e| {
                warn!(offset, level, %e, "paged data block with fewer than two pages");
                FormatError::geometry(structure, offset, e.to_string())
            })
    }

    pub(crate) fn level(&self, level: usize, structure: Structure, offset: u64) -> Result<&SecondaryBlockInfo> {
        self.secondary_blocks.get(level).ok_or_else(|| {
            FormatError::geometry(structure, offset, format!("growth level {level} does not exist"))
        })
    }

    /// Total number of elements the array can address.
    pub fn capacity(&self) -> u64 {
        let tail = self.secondary_blocks.last().map_or(0, SecondaryBlockInfo::element_end);
        u64::from(self.index_block_elements).saturating_add(tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::jenkins_lookup3;
    use crate::context::FileContext;
    use crate::options::ChunkIndexOptions;

    fn header_bytes(client: u8, esize: u8, params: [u8; 5], iblock: u64) -> Vec<u8> {
        let mut b = b"EAHD".to_vec();
        b.push(0);
        b.push(client);
        b.push(esize);
        b.extend_from_slice(&params);
        for stat in [1u64, 2, 3, 4, 5, 6] {
            b.extend_from_slice(&stat.to_le_bytes());
        }
        b.extend_from_slice(&iblock.to_le_bytes());
        let sum = jenkins_lookup3(&b);
        b.extend_from_slice(&sum.to_le_bytes());
        b
    }

    fn decode(bytes: &[u8]) -> Result<ExtensibleArrayHeader> {
        let reader = BlockReader::new(bytes, FileContext::new(8, 8).unwrap(), ChunkIndexOptions::default());
        ExtensibleArrayHeader::decode(&reader, 0)
    }

    #[test]
    fn decodes_reference_defaults() {
        let bytes = header_bytes(0, 8, [32, 4, 16, 4, 10], 0x400);
        assert_eq!(bytes.len(), ExtensibleArrayHeader::encoded_size(8, 8));
        let hdr = decode(&bytes).unwrap();
        assert_eq!(hdr.client, ClientKind::Chunks);
        assert_eq!(hdr.index_block_address, Some(0x400));
        assert_eq!(hdr.stats.max_index_set, 5);
        assert_eq!(hdr.stats.element_count, 6);
        assert_eq!(hdr.secondary_block_infos().len(), 29);
        assert_eq!(hdr.page_elements(), 1024);
        assert_eq!(hdr.page_size(), 1024 * 8 + 4);
        assert_eq!(hdr.array_offset_size(), 4);
        assert_eq!(hdr.index_block_data_block_count(), 6);
        assert_eq!(hdr.index_block_secondary_block_count(), 25);
    }

    #[test]
    fn undefined_index_block_address() {
        let hdr = decode(&header_bytes(0, 8, [32, 4, 16, 4, 10], u64::MAX)).unwrap();
        assert_eq!(hdr.index_block_address, None);
    }

    #[test]
    fn rejects_bad_parameters() {
        for params in [[32, 4, 12, 4, 10], [32, 4, 16, 3, 10], [2, 4, 16, 4, 10], [65, 4, 16, 4, 10]] {
            assert!(
                matches!(
                    decode(&header_bytes(0, 8, params, 0)),
                    Err(FormatError::GeometryInvariantViolation { structure: Structure::EaHeader, .. })
                ),
                "{params:?}"
            );
        }
        assert!(decode(&header_bytes(7, 8, [32, 4, 16, 4, 10], 0)).is_err());
        assert!(decode(&header_bytes(0, 4, [32, 4, 16, 4, 10], 0)).is_err());
    }

    #[test]
    fn checksum_and_version() {
        let mut bytes = header_bytes(0, 8, [32, 4, 16, 4, 10], 0x400);
        bytes[12] ^= 0x40;
        assert!(matches!(decode(&bytes), Err(FormatError::ChecksumMismatch { .. })));

        let mut bytes = header_bytes(0, 8, [32, 4, 16, 4, 10], 0x400);
        bytes[4] = 1;
        assert!(matches!(decode(&bytes), Err(FormatError::UnsupportedVersion { version: 1, .. })));
    }

    #[test]
    fn page_counts_per_level() {
        // min 4 elements, pages of 8: level 3 holds 16-element blocks (2 pages)
        let hdr = decode(&header_bytes(0, 8, [10, 4, 4, 4, 3], 0)).unwrap();
        assert_eq!(hdr.data_block_page_count(1, Structure::EaSecondaryBlock, 0).unwrap(), 0);
        assert_eq!(hdr.data_block_page_count(3, Structure::EaSecondaryBlock, 0).unwrap(), 2);
        assert!(hdr.data_block_page_count(99, Structure::EaSecondaryBlock, 0).is_err());
    }
}

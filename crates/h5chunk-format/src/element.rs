//! Raw index elements: chunk addresses, optionally with size and filter mask.

use crate::checksum::CHECKSUM_SIZE;
use crate::context::FileContext;
use crate::cursor::Cursor;
use crate::error::{FormatError, Result, Structure};
use crate::source::{BlockReader, ByteSource};

/// Where a chunk's bytes live in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkLocation {
    /// File address of the first byte of the chunk.
    pub address: u64,
    /// On-disk (filtered) size in bytes. `None` when the index only records
    /// the address and the size is implied by the chunk dimensions.
    pub size: Option<u64>,
    /// Filter mask; bit `n` set means filter `n` was skipped for this chunk.
    pub filter_mask: u32,
}

impl ChunkLocation {
    /// Location of an unfiltered chunk.
    pub fn unfiltered(address: u64) -> Self {
        Self {
            address,
            size: None,
            filter_mask: 0,
        }
    }

    /// Location of a filtered chunk.
    pub fn filtered(address: u64, size: u64, filter_mask: u32) -> Self {
        Self {
            address,
            size: Some(size),
            filter_mask,
        }
    }
}

/// The indexing client that owns an array, identified by a one-byte ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    /// Elements are bare chunk addresses.
    Chunks,
    /// Elements are (address, chunk size, filter mask) triples.
    FilteredChunks,
}

impl ClientKind {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(ClientKind::Chunks),
            1 => Some(ClientKind::FilteredChunks),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            ClientKind::Chunks => 0,
            ClientKind::FilteredChunks => 1,
        }
    }
}

/// Decoder for one array's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementCodec {
    kind: ClientKind,
    element_size: usize,
    chunk_size_width: usize,
}

impl ElementCodec {
    /// Validate `element_size` against the client kind and the file's
    /// address width.
    ///
    /// Unfiltered elements must be exactly one address wide. Filtered
    /// elements are `address + size + mask(4)`, and the size field must be
    /// 1 to 8 bytes.
    pub fn new(
        kind: ClientKind,
        element_size: u8,
        file: &FileContext,
        structure: Structure,
        offset: u64,
    ) -> Result<Self> {
        let element_size = element_size as usize;
        let os = file.offset_size() as usize;
        let chunk_size_width = match kind {
            ClientKind::Chunks => {
                if element_size != os {
                    return Err(FormatError::geometry(
                        structure,
                        offset,
                        format!("unfiltered element size {element_size} must equal address width {os}"),
                    ));
                }
                0
            }
            ClientKind::FilteredChunks => {
                let width = element_size.checked_sub(os + 4).unwrap_or(0);
                if !(1..=8).contains(&width) {
                    return Err(FormatError::geometry(
                        structure,
                        offset,
                        format!(
                            "filtered element size {element_size} leaves {width} bytes for the chunk size field"
                        ),
                    ));
                }
                width
            }
        };
        Ok(Self {
            kind,
            element_size,
            chunk_size_width,
        })
    }

    #[inline]
    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    /// Encoded size of one element in bytes.
    #[inline]
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Width of the chunk size field of filtered elements (0 if unfiltered).
    #[inline]
    pub fn chunk_size_width(&self) -> usize {
        self.chunk_size_width
    }

    /// Decode one element. An undefined address decodes to `None`; the
    /// element's remaining bytes are still consumed.
    pub fn decode(&self, cursor: &mut Cursor<'_>, file: &FileContext) -> Result<Option<ChunkLocation>> {
        let address = file.read_address(cursor)?;
        let location = match self.kind {
            ClientKind::Chunks => address.map(ChunkLocation::unfiltered),
            ClientKind::FilteredChunks => {
                let size = cursor.read_uint(self.chunk_size_width)?;
                let mask = cursor.read_u32()?;
                address.map(|a| ChunkLocation::filtered(a, size, mask))
            }
        };
        Ok(location)
    }

    /// Decode `count` consecutive elements.
    pub fn decode_many(
        &self,
        cursor: &mut Cursor<'_>,
        file: &FileContext,
        count: usize,
    ) -> Result<Vec<Option<ChunkLocation>>> {
        let mut out = Vec::with_capacity(count.min(cursor.remaining() / self.element_size.max(1)));
        for _ in 0..count {
            out.push(self.decode(cursor, file)?);
        }
        Ok(out)
    }

    /// Byte size of a page of `count` elements including its checksum.
    #[inline]
    pub fn page_size(&self, count: u64) -> u64 {
        count * self.element_size as u64 + CHECKSUM_SIZE as u64
    }

    /// Fetch and decode a checksummed run of `count` elements at `address`.
    pub fn read_page<S: ByteSource + ?Sized>(
        &self,
        reader: &BlockReader<'_, S>,
        structure: Structure,
        address: u64,
        count: usize,
    ) -> Result<Vec<Option<ChunkLocation>>> {
        let len = count
            .checked_mul(self.element_size)
            .and_then(|n| n.checked_add(CHECKSUM_SIZE))
            .ok_or_else(|| FormatError::geometry(structure, address, "page size overflows"))?;
        let image = reader.fetch_checked(structure, address, len)?;
        let mut cursor = Cursor::new(&image, address, structure);
        self.decode_many(&mut cursor, reader.file(), count)
    }
}

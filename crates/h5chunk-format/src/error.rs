//! Error types for HDF5 chunk index decoding.

use core::fmt;

/// The on-disk structure an error was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Structure {
    /// Extensible array header (`EAHD`).
    EaHeader,
    /// Extensible array index block (`EAIB`).
    EaIndexBlock,
    /// Extensible array secondary ("super") block (`EASB`).
    EaSecondaryBlock,
    /// Extensible array data block (`EADB`).
    EaDataBlock,
    /// One page of a paged extensible array data block.
    EaDataBlockPage,
    /// Fixed array header (`FAHD`).
    FaHeader,
    /// Fixed array data block (`FADB`).
    FaDataBlock,
    /// One page of a paged fixed array data block.
    FaDataBlockPage,
    /// Version 1 B-tree node (`TREE`).
    BTreeV1Node,
    /// Data layout message.
    LayoutMessage,
}

impl Structure {
    /// The 4-byte magic that starts this structure, if it has one.
    pub fn signature(self) -> Option<&'static [u8; 4]> {
        match self {
            Structure::EaHeader => Some(b"EAHD"),
            Structure::EaIndexBlock => Some(b"EAIB"),
            Structure::EaSecondaryBlock => Some(b"EASB"),
            Structure::EaDataBlock => Some(b"EADB"),
            Structure::FaHeader => Some(b"FAHD"),
            Structure::FaDataBlock => Some(b"FADB"),
            Structure::BTreeV1Node => Some(b"TREE"),
            Structure::EaDataBlockPage | Structure::FaDataBlockPage | Structure::LayoutMessage => {
                None
            }
        }
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Structure::EaHeader => "extensible array header",
            Structure::EaIndexBlock => "extensible array index block",
            Structure::EaSecondaryBlock => "extensible array secondary block",
            Structure::EaDataBlock => "extensible array data block",
            Structure::EaDataBlockPage => "extensible array data block page",
            Structure::FaHeader => "fixed array header",
            Structure::FaDataBlock => "fixed array data block",
            Structure::FaDataBlockPage => "fixed array data block page",
            Structure::BTreeV1Node => "v1 B-tree node",
            Structure::LayoutMessage => "data layout message",
        };
        f.write_str(name)
    }
}

/// Errors that can occur when decoding chunk index structures.
///
/// Every structural variant carries the file offset of the structure that
/// failed so corrupt files can be diagnosed. An unwritten chunk is not an
/// error: lookups return `Ok(None)` for it.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// The 4-byte magic at the start of a block did not match.
    #[error("invalid {structure} signature at offset {offset:#x}: found {found:02x?}")]
    SignatureMismatch {
        structure: Structure,
        offset: u64,
        found: [u8; 4],
    },

    /// The block version is not 0.
    #[error("unsupported {structure} version {version} at offset {offset:#x}")]
    UnsupportedVersion {
        structure: Structure,
        offset: u64,
        version: u8,
    },

    /// The stored lookup3 checksum does not match the block bytes.
    #[error(
        "{structure} checksum mismatch at offset {offset:#x}: stored {stored:#010x}, computed {computed:#010x}"
    )]
    ChecksumMismatch {
        structure: Structure,
        offset: u64,
        stored: u32,
        computed: u32,
    },

    /// Decoded parameters describe a layout no encoder would produce.
    #[error("{structure} at offset {offset:#x} violates a geometry invariant: {reason}")]
    GeometryInvariantViolation {
        structure: Structure,
        offset: u64,
        reason: String,
    },

    /// A block belongs to a different indexing client than its header.
    #[error("{structure} at offset {offset:#x} has client id {found}, expected {expected}")]
    ClientIdMismatch {
        structure: Structure,
        offset: u64,
        expected: u8,
        found: u8,
    },

    /// A block's header back-reference points somewhere else.
    #[error("{structure} at offset {offset:#x} references header {found:#x}, expected {expected:#x}")]
    HeaderAddressMismatch {
        structure: Structure,
        offset: u64,
        expected: u64,
        found: u64,
    },

    /// A block image ended before a field could be read.
    #[error("unexpected end of {structure} at offset {offset:#x}: need {expected} bytes, have {available}")]
    UnexpectedEof {
        structure: Structure,
        offset: u64,
        expected: usize,
        available: usize,
    },

    /// Invalid offset size (must be 2, 4, or 8).
    #[error("invalid offset size: {0} (must be 2, 4, or 8)")]
    InvalidOffsetSize(u8),

    /// Invalid length size (must be 2, 4, or 8).
    #[error("invalid length size: {0} (must be 2, 4, or 8)")]
    InvalidLengthSize(u8),

    /// The chunked storage description is malformed.
    #[error("invalid chunked layout: {0}")]
    InvalidLayout(String),

    /// The chunk index type exists but is not decoded by this crate.
    #[error("unsupported chunk index type: {0}")]
    UnsupportedIndex(crate::chunk_index::ChunkIndexKind),

    /// The index handle was closed while a lookup was running.
    #[error("chunk index handle is closed")]
    HandleClosed,

    /// Error from the underlying byte source, passed through unchanged.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FormatError {
    /// File offset of the offending structure, when the error has one.
    pub fn offset(&self) -> Option<u64> {
        match self {
            FormatError::SignatureMismatch { offset, .. }
            | FormatError::UnsupportedVersion { offset, .. }
            | FormatError::ChecksumMismatch { offset, .. }
            | FormatError::GeometryInvariantViolation { offset, .. }
            | FormatError::ClientIdMismatch { offset, .. }
            | FormatError::HeaderAddressMismatch { offset, .. }
            | FormatError::UnexpectedEof { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    /// The structure kind the error was raised for, when known.
    pub fn structure(&self) -> Option<Structure> {
        match self {
            FormatError::SignatureMismatch { structure, .. }
            | FormatError::UnsupportedVersion { structure, .. }
            | FormatError::ChecksumMismatch { structure, .. }
            | FormatError::GeometryInvariantViolation { structure, .. }
            | FormatError::ClientIdMismatch { structure, .. }
            | FormatError::HeaderAddressMismatch { structure, .. }
            | FormatError::UnexpectedEof { structure, .. } => Some(*structure),
            _ => None,
        }
    }

    pub(crate) fn geometry(structure: Structure, offset: u64, reason: impl Into<String>) -> Self {
        FormatError::GeometryInvariantViolation {
            structure,
            offset,
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FormatError>;

//! Per-file decoding parameters taken from the superblock.

use crate::cursor::Cursor;
use crate::error::{FormatError, Result};

/// File-wide address and length widths.
///
/// Every structure that stores a file address or a byte length uses these
/// widths, so they are threaded through every decode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileContext {
    offset_size: u8,
    length_size: u8,
}

fn validate_size(size: u8) -> bool {
    matches!(size, 2 | 4 | 8)
}

impl FileContext {
    /// Create a context, validating both widths (2, 4, or 8 bytes).
    pub fn new(offset_size: u8, length_size: u8) -> Result<Self> {
        if !validate_size(offset_size) {
            return Err(FormatError::InvalidOffsetSize(offset_size));
        }
        if !validate_size(length_size) {
            return Err(FormatError::InvalidLengthSize(length_size));
        }
        Ok(Self {
            offset_size,
            length_size,
        })
    }

    /// Size of file addresses in bytes.
    #[inline]
    pub fn offset_size(&self) -> u8 {
        self.offset_size
    }

    /// Size of lengths in bytes.
    #[inline]
    pub fn length_size(&self) -> u8 {
        self.length_size
    }

    /// The "undefined address" sentinel at this file's width (all bits set).
    #[inline]
    pub fn undefined_address(&self) -> u64 {
        if self.offset_size == 8 {
            u64::MAX
        } else {
            (1u64 << (8 * u32::from(self.offset_size))) - 1
        }
    }

    /// Read a raw file address.
    pub fn read_offset(&self, cursor: &mut Cursor<'_>) -> Result<u64> {
        cursor.read_uint(self.offset_size as usize)
    }

    /// Read a length field.
    pub fn read_length(&self, cursor: &mut Cursor<'_>) -> Result<u64> {
        cursor.read_uint(self.length_size as usize)
    }

    /// Read a file address, mapping the undefined sentinel to `None`.
    pub fn read_address(&self, cursor: &mut Cursor<'_>) -> Result<Option<u64>> {
        let addr = self.read_offset(cursor)?;
        Ok((addr != self.undefined_address()).then_some(addr))
    }
}

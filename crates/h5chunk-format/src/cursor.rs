//! Sequential little-endian reader over a fetched block image.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{FormatError, Result, Structure};

/// A position-based reader over the bytes of one on-disk structure.
///
/// `base` is the file address of `data[0]`; it is only used to tag errors
/// with the offending file offset.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: u64,
    structure: Structure,
}

impl<'a> Cursor<'a> {
    /// Create a cursor at position 0 of `data`.
    pub fn new(data: &'a [u8], base: u64, structure: Structure) -> Self {
        Self {
            data,
            pos: 0,
            base,
            structure,
        }
    }

    /// Current position relative to the start of the image.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// File address of the next byte.
    #[inline]
    pub fn file_offset(&self) -> u64 {
        self.base + self.pos as u64
    }

    /// Bytes left after the current position.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Move to an absolute position within the image.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(self.eof(pos));
        }
        self.pos = pos;
        Ok(())
    }

    /// Advance by `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    fn eof(&self, needed_end: usize) -> FormatError {
        FormatError::UnexpectedEof {
            structure: self.structure,
            offset: self.base,
            expected: needed_end,
            available: self.data.len(),
        }
    }

    /// Borrow the next `n` bytes and advance past them.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| self.eof(usize::MAX))?;
        if end > self.data.len() {
            return Err(self.eof(end));
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    /// Read an unsigned little-endian integer of 1 to 8 bytes.
    pub fn read_uint(&mut self, width: usize) -> Result<u64> {
        if width == 0 || width > 8 {
            return Err(FormatError::geometry(
                self.structure,
                self.base,
                format!("integer field width {width} is outside 1..=8"),
            ));
        }
        Ok(LittleEndian::read_uint(self.take(width)?, width))
    }

    /// Read a 4-byte magic and compare it with `structure`'s signature.
    pub fn expect_signature(&mut self) -> Result<()> {
        let found: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| self.eof(4))?;
        match self.structure.signature() {
            Some(expected) if *expected != found => Err(FormatError::SignatureMismatch {
                structure: self.structure,
                offset: self.base,
                found,
            }),
            _ => Ok(()),
        }
    }

    /// Read the version byte and require it to be 0.
    pub fn expect_version_zero(&mut self) -> Result<()> {
        let version = self.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: self.structure,
                offset: self.base,
                version,
            });
        }
        Ok(())
    }
}

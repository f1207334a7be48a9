//! Positional byte sources and checked block fetching.
//!
//! Decoders never hold a shared cursor into the file. Each structure is
//! fetched as one image with [`ByteSource::read_exact_at`] and then parsed
//! with a private [`Cursor`](crate::cursor::Cursor), so concurrent lookups
//! only contend inside the source implementation itself.

use std::io;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::checksum::verify_trailing;
use crate::context::FileContext;
use crate::cursor::Cursor;
use crate::error::{FormatError, Result, Structure};
use crate::options::ChunkIndexOptions;

/// Read-only, position-addressed access to file bytes.
///
/// Implementations backed by a seekable handle must serialize seek+read
/// internally; callers may invoke `read_exact_at` from several threads.
pub trait ByteSource: Send + Sync {
    /// Fill `buf` with the bytes starting at file offset `offset`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Total number of readable bytes.
    fn len(&self) -> u64;

    /// Returns true if the source holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn slice_read_at(data: &[u8], offset: u64, buf: &mut [u8]) -> io::Result<()> {
    let start = usize::try_from(offset)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset exceeds address space"))?;
    let end = start
        .checked_add(buf.len())
        .filter(|&end| end <= data.len())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at offset {offset:#x} past end of {}-byte source",
                    buf.len(),
                    data.len()
                ),
            )
        })?;
    buf.copy_from_slice(&data[start..end]);
    Ok(())
}

impl ByteSource for [u8] {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        slice_read_at(self, offset, buf)
    }

    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }
}

impl ByteSource for Vec<u8> {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        slice_read_at(self, offset, buf)
    }

    fn len(&self) -> u64 {
        Vec::len(self) as u64
    }
}

impl<T: ByteSource + ?Sized> ByteSource for &T {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact_at(offset, buf)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }
}

impl<T: ByteSource + ?Sized> ByteSource for Arc<T> {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact_at(offset, buf)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }
}

impl<T: ByteSource + ?Sized> ByteSource for Box<T> {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact_at(offset, buf)
    }

    fn len(&self) -> u64 {
        (**self).len()
    }
}

/// Everything a block decoder needs: the byte source, the file widths and
/// the validation options.
#[derive(Debug)]
pub struct BlockReader<'a, S: ?Sized> {
    source: &'a S,
    file: FileContext,
    options: ChunkIndexOptions,
}

impl<S: ?Sized> Clone for BlockReader<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: ?Sized> Copy for BlockReader<'_, S> {}

impl<'a, S: ByteSource + ?Sized> BlockReader<'a, S> {
    pub fn new(source: &'a S, file: FileContext, options: ChunkIndexOptions) -> Self {
        Self {
            source,
            file,
            options,
        }
    }

    #[inline]
    pub fn file(&self) -> &FileContext {
        &self.file
    }

    #[inline]
    pub fn options(&self) -> &ChunkIndexOptions {
        &self.options
    }

    #[inline]
    pub fn source(&self) -> &'a S {
        self.source
    }

    /// Read a block's client ID and header back-reference from `cur` and,
    /// when enabled, check them against the owning header's `client_id`
    /// and `header_address`.
    pub fn check_owner(
        &self,
        cur: &mut Cursor<'_>,
        client_id: u8,
        header_address: u64,
        structure: Structure,
        address: u64,
    ) -> Result<()> {
        let found_client = cur.read_u8()?;
        let found_header = self.file.read_offset(cur)?;
        if !self.options.validate_back_references {
            return Ok(());
        }
        if found_client != client_id {
            warn!(%structure, address, client_id = found_client, "client id does not match header");
            return Err(FormatError::ClientIdMismatch {
                structure,
                offset: address,
                expected: client_id,
                found: found_client,
            });
        }
        if found_header != header_address {
            warn!(%structure, address, header_address = found_header, "header back-reference does not match");
            return Err(FormatError::HeaderAddressMismatch {
                structure,
                offset: address,
                expected: header_address,
                found: found_header,
            });
        }
        Ok(())
    }

    /// Fetch `len` raw bytes at `address`.
    pub fn fetch(&self, structure: Structure, address: u64, len: usize) -> Result<Vec<u8>> {
        trace!(%structure, address, len, "fetch block image");
        if len as u64 > self.source.len().saturating_sub(address) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{structure} of {len} bytes at {address:#x} extends past end of source"),
            )
            .into());
        }
        let mut image = vec![0u8; len];
        self.source.read_exact_at(address, &mut image)?;
        Ok(image)
    }

    /// Fetch a block image whose last 4 bytes are a lookup3 checksum and
    /// verify it (unless checksum verification is disabled).
    pub fn fetch_checked(&self, structure: Structure, address: u64, len: usize) -> Result<Vec<u8>> {
        let image = self.fetch(structure, address, len)?;
        if self.options.verify_checksums {
            verify_trailing(&image, structure, address)?;
        }
        Ok(image)
    }

    /// Fetch a signed, versioned block. The magic is checked first, then
    /// the version byte, then the checksum trailer.
    pub fn fetch_block(&self, structure: Structure, address: u64, len: usize) -> Result<Vec<u8>> {
        let image = self.fetch(structure, address, len)?;
        let mut cursor = Cursor::new(&image, address, structure);
        cursor.expect_signature()?;
        cursor.expect_version_zero()?;
        if self.options.verify_checksums {
            verify_trailing(&image, structure, address)?;
        }
        Ok(image)
    }
}

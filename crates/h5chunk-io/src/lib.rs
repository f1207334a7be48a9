//! Byte sources for reading HDF5 chunk indexes.
//!
//! Every reader here implements [`ByteSource`], the positional read
//! interface that `h5chunk-format` decodes from. In-memory and
//! memory-mapped readers are lock-free; [`FileReader`] shares one file
//! handle between threads and serializes seek+read behind a mutex.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, trace};

pub use h5chunk_format;
use h5chunk_format::ByteSource;

// ---------------------------------------------------------------------------
// MemoryReader: owned bytes
// ---------------------------------------------------------------------------

/// In-memory reader backed by an owned `Vec<u8>`.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    data: Vec<u8>,
}

impl MemoryReader {
    /// Create a reader from an owned byte vector.
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Create a reader by copying from a byte slice.
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the reader and return the underlying bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl ByteSource for MemoryReader {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.data.as_slice().read_exact_at(offset, buf)
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

// ---------------------------------------------------------------------------
// BorrowedReader: borrowed bytes, no copy
// ---------------------------------------------------------------------------

/// Zero-copy reader over a borrowed byte slice.
#[derive(Debug, Clone, Copy)]
pub struct BorrowedReader<'a> {
    data: &'a [u8],
}

impl<'a> BorrowedReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }
}

impl ByteSource for BorrowedReader<'_> {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.data.read_exact_at(offset, buf)
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }
}

// ---------------------------------------------------------------------------
// FileReader: shared std::fs::File
// ---------------------------------------------------------------------------

/// File-backed reader that fetches only the blocks a lookup touches.
///
/// The handle's cursor is shared state, so each read holds the lock across
/// its seek and read.
#[derive(Debug)]
pub struct FileReader {
    file: Mutex<File>,
    len: u64,
}

impl FileReader {
    /// Open a file for reading.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let reader = Self::from_file(File::open(path)?)?;
        debug!(path = %path.display(), len = reader.len, "opened file byte source");
        Ok(reader)
    }

    /// Create a reader from an already-opened file.
    pub fn from_file(file: File) -> io::Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }

    /// Consume the reader and return the file handle.
    pub fn into_inner(self) -> File {
        self.file.into_inner()
    }
}

impl ByteSource for FileReader {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let end = offset.checked_add(buf.len() as u64);
        if end.map_or(true, |end| end > self.len) {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "read of {} bytes at offset {offset:#x} past end of {}-byte file",
                    buf.len(),
                    self.len
                ),
            ));
        }
        trace!(offset, len = buf.len(), "file read");
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

// ---------------------------------------------------------------------------
// Optional modules
// ---------------------------------------------------------------------------

#[cfg(feature = "mmap")]
pub mod mmap;

#[cfg(feature = "mmap")]
pub use mmap::MmapReader;

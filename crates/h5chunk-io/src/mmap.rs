//! Memory-mapped file reader for zero-copy chunk index access.

use std::fs;
use std::io;
use std::path::Path;

use h5chunk_format::ByteSource;
use memmap2::Mmap;
use tracing::debug;

/// Read-only memory-mapped file.
///
/// Block images are copied straight out of the mapping, so concurrent
/// lookups never contend on a lock.
pub struct MmapReader {
    _file: fs::File,
    mmap: Mmap,
}

impl std::fmt::Debug for MmapReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MmapReader").field("len", &self.mmap.len()).finish()
    }
}

impl MmapReader {
    /// Open a file and memory-map it for reading.
    ///
    /// The file must not be truncated or rewritten by another process while
    /// the mapping is alive.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = fs::File::open(path)?;
        // SAFETY: read-only mapping; the caller guarantees the file is not
        // modified concurrently.
        let mmap = unsafe { Mmap::map(&file)? };
        debug!(path = %path.display(), len = mmap.len(), "mapped file byte source");
        Ok(Self { _file: file, mmap })
    }

    /// Zero-copy access to the entire file contents.
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Borrow `len` bytes at `offset`, or `None` past the end of the file.
    pub fn read_at(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.mmap.get(offset..offset.checked_add(len)?)
    }
}

impl ByteSource for MmapReader {
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.as_bytes().read_exact_at(offset, buf)
    }

    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }
}

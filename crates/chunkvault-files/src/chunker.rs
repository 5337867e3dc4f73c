//! File chunking.
//!
//! Splits a byte source into fixed-size chunks. Every chunk has the configured
//! size except possibly the last one, which holds the remainder.

use crate::DEFAULT_CHUNK_SIZE;
use crate::error::{FilesError, Result};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Random-access byte source that can be chunked
///
/// Implemented for in-memory buffers and for regular files via [`FileSource`].
pub trait ByteSource {
    /// Total length of the source in bytes
    fn byte_len(&self) -> u64;

    /// Fill `buf` with the bytes starting at `offset`
    ///
    /// # Errors
    ///
    /// Returns an error if the range cannot be read in full.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

impl ByteSource for [u8] {
    fn byte_len(&self) -> u64 {
        self.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        let end = start
            .checked_add(buf.len())
            .filter(|&end| end <= self.len())
            .ok_or_else(|| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        buf.copy_from_slice(&self[start..end]);
        Ok(())
    }
}

impl ByteSource for Vec<u8> {
    fn byte_len(&self) -> u64 {
        self.as_slice().byte_len()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        self.as_slice().read_exact_at(offset, buf)
    }
}

impl<T: ByteSource + ?Sized> ByteSource for &T {
    fn byte_len(&self) -> u64 {
        (**self).byte_len()
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact_at(offset, buf)
    }
}

/// Regular file opened for positional reads
///
/// The length is captured when the file is opened.
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    /// Open a file for chunking
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its metadata read.
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl ByteSource for FileSource {
    fn byte_len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::other("file source lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }
}

/// A contiguous slice of a file's bytes
///
/// Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    index: u64,
    data: Vec<u8>,
    total_chunks: u64,
    file_id: Arc<str>,
}

impl Chunk {
    /// Create a chunk
    pub fn new(index: u64, data: Vec<u8>, total_chunks: u64, file_id: impl Into<Arc<str>>) -> Self {
        Self {
            index,
            data,
            total_chunks,
            file_id: file_id.into(),
        }
    }

    /// Position of this chunk within its file
    #[must_use]
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Chunk bytes
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Chunk length in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Number of chunks in the parent file
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }

    /// Identifier of the parent file
    #[must_use]
    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// Whether this is the final chunk of its file
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total_chunks
    }

    /// Consume the chunk and return its bytes
    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Chunk a file into fixed-size pieces
#[derive(Debug, Clone, Copy)]
pub struct FileChunker {
    chunk_size: usize,
}

impl FileChunker {
    /// Create a new chunker with default chunk size
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Create a new chunker with custom chunk size
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::InvalidChunkSize`] if `size` is zero.
    pub fn with_chunk_size(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(FilesError::InvalidChunkSize(size));
        }
        Ok(Self { chunk_size: size })
    }

    /// Get chunk size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Calculate number of chunks for a file
    pub fn chunk_count(&self, file_size: u64) -> u64 {
        file_size.div_ceil(self.chunk_size as u64)
    }

    /// Length of the chunk at `index` for a file of `file_size` bytes
    ///
    /// Returns 0 for indices past the end of the file.
    pub fn chunk_len(&self, index: u64, file_size: u64) -> usize {
        let start = index.saturating_mul(self.chunk_size as u64);
        if start >= file_size {
            return 0;
        }
        (file_size - start).min(self.chunk_size as u64) as usize
    }

    /// Lazily chunk a byte source
    ///
    /// The returned iterator reads one chunk per step. Call `chunks` again
    /// (or clone the iterator) to restart.
    pub fn chunks<'a, S: ByteSource + ?Sized>(
        &self,
        source: &'a S,
        file_id: impl Into<Arc<str>>,
    ) -> Chunks<'a, S> {
        let file_size = source.byte_len();
        Chunks {
            source,
            chunker: *self,
            file_id: file_id.into(),
            file_size,
            total: self.chunk_count(file_size),
            next_index: 0,
        }
    }

    /// Chunk an in-memory buffer in one pass
    pub fn split(&self, data: &[u8], file_id: impl Into<Arc<str>>) -> Vec<Chunk> {
        let file_id = file_id.into();
        let total = self.chunk_count(data.len() as u64);
        data.chunks(self.chunk_size)
            .enumerate()
            .map(|(i, piece)| Chunk::new(i as u64, piece.to_vec(), total, Arc::clone(&file_id)))
            .collect()
    }
}

impl Default for FileChunker {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy chunk iterator returned by [`FileChunker::chunks`]
pub struct Chunks<'a, S: ?Sized> {
    source: &'a S,
    chunker: FileChunker,
    file_id: Arc<str>,
    file_size: u64,
    total: u64,
    next_index: u64,
}

impl<S: ?Sized> Chunks<'_, S> {
    /// Total number of chunks this iterator produces
    pub fn total_chunks(&self) -> u64 {
        self.total
    }
}

impl<S: ?Sized> Clone for Chunks<'_, S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source,
            chunker: self.chunker,
            file_id: Arc::clone(&self.file_id),
            file_size: self.file_size,
            total: self.total,
            next_index: self.next_index,
        }
    }
}

impl<S: ByteSource + ?Sized> Iterator for Chunks<'_, S> {
    type Item = Result<Chunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index >= self.total {
            return None;
        }

        let index = self.next_index;
        self.next_index += 1;

        let len = self.chunker.chunk_len(index, self.file_size);
        let offset = index * self.chunker.chunk_size as u64;
        let mut data = vec![0u8; len];
        if let Err(e) = self.source.read_exact_at(offset, &mut data) {
            // Stop after a read error; the caller decides whether to restart.
            self.next_index = self.total;
            return Some(Err(FilesError::Io(e)));
        }

        Some(Ok(Chunk::new(
            index,
            data,
            self.total,
            Arc::clone(&self.file_id),
        )))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.total - self.next_index) as usize;
        (remaining, Some(remaining))
    }
}

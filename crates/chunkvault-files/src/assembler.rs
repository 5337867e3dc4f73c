//! File reassembly from chunks.
//!
//! Chunks may arrive in any order. They are slotted by index and, once every
//! slot is filled, the hash tree is rebuilt over the chunk digests and checked
//! against the root recorded at backup time before any bytes are released.

use crate::chunker::Chunk;
use crate::error::{FilesError, Result};
use crate::hasher::{ChunkDigest, hash_chunk};
use crate::tree_hash::IntegrityTree;

/// Collects a file's chunks and rebuilds its byte stream
#[derive(Debug)]
pub struct ChunkAssembler {
    slots: Vec<Option<Vec<u8>>>,
    received: u64,
}

impl ChunkAssembler {
    /// Create an assembler for a file of `total_chunks` chunks
    #[must_use]
    pub fn new(total_chunks: u64) -> Self {
        Self {
            slots: (0..total_chunks).map(|_| None).collect(),
            received: 0,
        }
    }

    /// Number of chunks the file consists of
    #[must_use]
    pub fn total_chunks(&self) -> u64 {
        self.slots.len() as u64
    }

    /// Number of chunks received so far
    #[must_use]
    pub fn received(&self) -> u64 {
        self.received
    }

    /// Store a chunk's bytes
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::UnexpectedChunk`] for an index past the end of the
    /// file and [`FilesError::DuplicateChunk`] if the index was already filled.
    pub fn insert(&mut self, chunk: Chunk) -> Result<()> {
        let index = chunk.index();
        self.insert_bytes(index, chunk.into_data())
    }

    /// Store raw bytes for chunk `index`
    ///
    /// # Errors
    ///
    /// Same as [`ChunkAssembler::insert`].
    pub fn insert_bytes(&mut self, index: u64, data: Vec<u8>) -> Result<()> {
        let total = self.total_chunks();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| self.slots.get_mut(i))
            .ok_or(FilesError::UnexpectedChunk { index, total })?;

        if slot.is_some() {
            return Err(FilesError::DuplicateChunk(index));
        }
        *slot = Some(data);
        self.received += 1;
        Ok(())
    }

    /// Indices not yet received, ascending
    #[must_use]
    pub fn missing(&self) -> Vec<u64> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(i, _)| i as u64)
            .collect()
    }

    /// Whether every chunk has been received
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.received == self.total_chunks()
    }

    /// Verify and concatenate the chunks
    ///
    /// # Errors
    ///
    /// - [`FilesError::Incomplete`] if any index is missing
    /// - [`FilesError::EmptyTree`] for a zero-chunk file
    /// - [`FilesError::IntegrityMismatch`] if the recomputed root differs from
    ///   `expected_root`
    pub fn finish(self, expected_root: &ChunkDigest) -> Result<Vec<u8>> {
        if !self.is_complete() {
            return Err(FilesError::Incomplete {
                missing: self.missing(),
            });
        }

        let chunks: Vec<Vec<u8>> = self.slots.into_iter().flatten().collect();
        let leaves = chunks.iter().map(|c| hash_chunk(c)).collect();
        let tree = IntegrityTree::build(leaves)?;

        if !tree.verify(expected_root) {
            tracing::error!(
                "Integrity check failed: expected root {}, computed {}",
                expected_root,
                tree.root()
            );
            return Err(FilesError::IntegrityMismatch {
                expected: *expected_root,
                actual: tree.root(),
            });
        }

        let total_len = chunks.iter().map(Vec::len).sum();
        let mut output = Vec::with_capacity(total_len);
        for chunk in chunks {
            output.extend_from_slice(&chunk);
        }
        Ok(output)
    }
}

/// Reassemble a file from an unordered chunk set
///
/// # Errors
///
/// See [`ChunkAssembler::insert`] and [`ChunkAssembler::finish`].
pub fn reassemble<I>(chunks: I, total_chunks: u64, expected_root: &ChunkDigest) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = Chunk>,
{
    let mut assembler = ChunkAssembler::new(total_chunks);
    for chunk in chunks {
        assembler.insert(chunk)?;
    }
    assembler.finish(expected_root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::FileChunker;
    use crate::tree_hash::compute_tree_hash_from_data;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 256) as u8).collect()
    }

    #[test]
    fn test_in_order_reassembly() {
        let data = sample(10_000);
        let chunker = FileChunker::with_chunk_size(4096).unwrap();
        let root = compute_tree_hash_from_data(&data, 4096).unwrap().root();

        let chunks = chunker.split(&data, "f");
        let rebuilt = reassemble(chunks, 3, &root).unwrap();
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_out_of_order_reassembly() {
        let data = sample(1_300_000);
        let chunker = FileChunker::new();
        let root = compute_tree_hash_from_data(&data, chunker.chunk_size())
            .unwrap()
            .root();

        let mut chunks = chunker.split(&data, "video.mp4");
        assert_eq!(chunks.len(), 3);
        // Supply as 2, 0, 1
        chunks.rotate_right(1);
        assert_eq!(chunks[0].index(), 2);

        let rebuilt = reassemble(chunks, 3, &root).unwrap();
        assert_eq!(rebuilt, data);
    }

    #[test]
    fn test_missing_chunk_reported() {
        let data = sample(3000);
        let chunker = FileChunker::with_chunk_size(1000).unwrap();
        let root = compute_tree_hash_from_data(&data, 1000).unwrap().root();

        let chunks: Vec<Chunk> = chunker
            .split(&data, "f")
            .into_iter()
            .filter(|c| c.index() != 1)
            .collect();

        match reassemble(chunks, 3, &root) {
            Err(FilesError::Incomplete { missing }) => assert_eq!(missing, vec![1]),
            other => panic!("expected Incomplete, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_chunk_reported() {
        let data = sample(3000);
        let chunker = FileChunker::with_chunk_size(1000).unwrap();
        let root = compute_tree_hash_from_data(&data, 1000).unwrap().root();

        let mut chunks = chunker.split(&data, "f");
        let mut tampered = chunks[0].data().to_vec();
        tampered[10] ^= 0xFF;
        chunks[0] = Chunk::new(0, tampered, 3, "f");

        match reassemble(chunks, 3, &root) {
            Err(FilesError::IntegrityMismatch { expected, actual }) => {
                assert_eq!(expected, root);
                assert_ne!(actual, root);
            }
            other => panic!("expected IntegrityMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_and_out_of_range() {
        let mut assembler = ChunkAssembler::new(2);
        assembler.insert_bytes(0, vec![1]).unwrap();

        assert!(matches!(
            assembler.insert_bytes(0, vec![1]),
            Err(FilesError::DuplicateChunk(0))
        ));
        assert!(matches!(
            assembler.insert_bytes(2, vec![1]),
            Err(FilesError::UnexpectedChunk { index: 2, total: 2 })
        ));
        assert_eq!(assembler.received(), 1);
        assert_eq!(assembler.missing(), vec![1]);
        assert!(!assembler.is_complete());
    }

    #[test]
    fn test_zero_chunks_rejected() {
        let assembler = ChunkAssembler::new(0);
        let root = hash_chunk(b"");
        assert!(matches!(assembler.finish(&root), Err(FilesError::EmptyTree)));
    }
}

//! BLAKE3 tree hashing for file integrity verification.
//!
//! Each file is divided into chunks and each chunk is hashed individually.
//! The chunk hashes form the leaf nodes of a binary tree, with parent nodes
//! computed by hashing the concatenation of their children. When a level has
//! an odd number of nodes the last node is paired with itself.
//!
//! The root summarizes the whole file: a restored file is accepted only if the
//! tree rebuilt from its chunks has the root recorded at backup time.

use crate::error::{FilesError, Result};
use crate::hasher::{ChunkDigest, hash_chunk};
use blake3::Hasher;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Hash tree over a file's ordered chunk digests
///
/// Contains the root hash (for quick verification) and all chunk hashes
/// (for selective verification of individual chunks).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityTree {
    root: ChunkDigest,
    leaves: Vec<ChunkDigest>,
}

impl IntegrityTree {
    /// Build a tree from ordered leaf digests
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::EmptyTree`] if `leaves` is empty.
    pub fn build(leaves: Vec<ChunkDigest>) -> Result<Self> {
        let root = compute_merkle_root(&leaves)?;
        Ok(Self { root, leaves })
    }

    /// Merkle root hash
    #[must_use]
    pub fn root(&self) -> ChunkDigest {
        self.root
    }

    /// Leaf digests in chunk order
    #[must_use]
    pub fn leaves(&self) -> &[ChunkDigest] {
        &self.leaves
    }

    /// Get number of leaves
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    /// Compare a candidate root against this tree's root
    #[must_use]
    pub fn verify(&self, candidate_root: &ChunkDigest) -> bool {
        self.root == *candidate_root
    }

    /// Verify a chunk against its expected leaf
    #[must_use]
    pub fn verify_chunk(&self, chunk_index: usize, chunk_data: &[u8]) -> bool {
        self.leaves
            .get(chunk_index)
            .is_some_and(|leaf| hash_chunk(chunk_data) == *leaf)
    }

    /// Get chunk hash
    #[must_use]
    pub fn get_chunk_hash(&self, chunk_index: usize) -> Option<&ChunkDigest> {
        self.leaves.get(chunk_index)
    }

    /// Consume the tree and return its leaves
    #[must_use]
    pub fn into_leaves(self) -> Vec<ChunkDigest> {
        self.leaves
    }
}

/// Hash two sibling nodes into their parent
fn hash_pair(left: &ChunkDigest, right: &ChunkDigest) -> ChunkDigest {
    let mut hasher = Hasher::new();
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    hasher.finalize().into()
}

/// Compute Merkle root from leaf hashes
///
/// A single leaf is its own root. On a level with an odd node count the last
/// node is hashed with a copy of itself.
///
/// # Errors
///
/// Returns [`FilesError::EmptyTree`] if `leaves` is empty.
///
/// # Example
///
/// ```
/// use chunkvault_files::hash_chunk;
/// use chunkvault_files::tree_hash::compute_merkle_root;
///
/// let leaves = vec![hash_chunk(b"a"), hash_chunk(b"b"), hash_chunk(b"c")];
/// let root = compute_merkle_root(&leaves)?;
/// assert_ne!(root, leaves[0]);
/// # Ok::<(), chunkvault_files::FilesError>(())
/// ```
pub fn compute_merkle_root(leaves: &[ChunkDigest]) -> Result<ChunkDigest> {
    match leaves {
        [] => return Err(FilesError::EmptyTree),
        [single] => return Ok(*single),
        _ => {}
    }

    let mut current_level = leaves.to_vec();

    while current_level.len() > 1 {
        current_level = current_level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_pair(left, right),
                [last] => hash_pair(last, last),
                _ => unreachable!("chunks(2) yields one or two nodes"),
            })
            .collect();
    }

    Ok(current_level[0])
}

/// Compute tree hash for a file on disk
///
/// # Errors
///
/// Returns an error if the chunk size is zero, the file cannot be read, or the
/// file is empty.
///
/// # Example
///
/// ```no_run
/// use chunkvault_files::tree_hash::compute_tree_hash;
///
/// let tree = compute_tree_hash("/path/to/file", 512 * 1024)?;
/// println!("Root hash: {}", tree.root());
/// println!("Chunks: {}", tree.leaf_count());
/// # Ok::<(), chunkvault_files::FilesError>(())
/// ```
pub fn compute_tree_hash<P: AsRef<Path>>(path: P, chunk_size: usize) -> Result<IntegrityTree> {
    if chunk_size == 0 {
        return Err(FilesError::InvalidChunkSize(chunk_size));
    }

    let mut file = File::open(path)?;
    let mut hasher = IncrementalTreeHasher::new(chunk_size);
    let mut buffer = vec![0u8; chunk_size];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    hasher.finalize()
}

/// Compute tree hash from in-memory data
///
/// # Errors
///
/// Returns an error if the chunk size is zero or `data` is empty.
///
/// # Example
///
/// ```
/// use chunkvault_files::tree_hash::compute_tree_hash_from_data;
///
/// let data = vec![0xAA; 1024 * 1024];
/// let tree = compute_tree_hash_from_data(&data, 256 * 1024)?;
/// assert_eq!(tree.leaf_count(), 4);
/// # Ok::<(), chunkvault_files::FilesError>(())
/// ```
pub fn compute_tree_hash_from_data(data: &[u8], chunk_size: usize) -> Result<IntegrityTree> {
    if chunk_size == 0 {
        return Err(FilesError::InvalidChunkSize(chunk_size));
    }
    IntegrityTree::build(data.chunks(chunk_size).map(hash_chunk).collect())
}

/// Incremental tree hasher for streaming data
///
/// Useful for hashing data as it is read without needing to buffer the
/// entire file in memory.
///
/// # Example
///
/// ```
/// use chunkvault_files::tree_hash::IncrementalTreeHasher;
///
/// let mut hasher = IncrementalTreeHasher::new(256 * 1024);
///
/// // Feed data in pieces
/// hasher.update(&[0xAA; 1024]);
/// hasher.update(&[0xBB; 1024]);
///
/// let tree = hasher.finalize()?;
/// assert_eq!(tree.leaf_count(), 1);
/// # Ok::<(), chunkvault_files::FilesError>(())
/// ```
pub struct IncrementalTreeHasher {
    chunk_hashes: Vec<ChunkDigest>,
    current: Hasher,
    buffered: usize,
    chunk_size: usize,
}

impl IncrementalTreeHasher {
    /// Create a new incremental hasher
    ///
    /// A zero `chunk_size` is treated as 1.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_hashes: Vec::new(),
            current: Hasher::new(),
            buffered: 0,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Update with new data
    ///
    /// Bytes are streamed into the current chunk's hasher; whenever a chunk
    /// boundary is reached its digest is appended to the leaf list.
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let room = self.chunk_size - self.buffered;
            let take = room.min(data.len());
            self.current.update(&data[..take]);
            self.buffered += take;
            data = &data[take..];

            if self.buffered == self.chunk_size {
                self.chunk_hashes.push(self.current.finalize().into());
                self.current.reset();
                self.buffered = 0;
            }
        }
    }

    /// Get number of complete chunks processed
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunk_hashes.len()
    }

    /// Get buffered byte count (not yet part of a finished chunk)
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.buffered
    }

    /// Finalize and get tree hash
    ///
    /// Hashes any partial trailing chunk and computes the Merkle root.
    ///
    /// # Errors
    ///
    /// Returns [`FilesError::EmptyTree`] if no bytes were fed.
    pub fn finalize(mut self) -> Result<IntegrityTree> {
        if self.buffered > 0 {
            self.chunk_hashes.push(self.current.finalize().into());
        }
        IntegrityTree::build(self.chunk_hashes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn leaf(n: u8) -> ChunkDigest {
        ChunkDigest::from_bytes([n; 32])
    }

    #[test]
    fn test_tree_hash_computation() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let data = vec![0xAA; 1024 * 1024]; // 1 MB
        temp_file.write_all(&data).unwrap();
        temp_file.flush().unwrap();

        let tree = compute_tree_hash(temp_file.path(), 256 * 1024).unwrap();

        assert_eq!(tree.leaf_count(), 4); // 1MB / 256KB
        assert_eq!(
            tree.root(),
            compute_tree_hash_from_data(&data, 256 * 1024).unwrap().root()
        );
    }

    #[test]
    fn test_empty_file_rejected() {
        let temp_file = NamedTempFile::new().unwrap();
        assert!(matches!(
            compute_tree_hash(temp_file.path(), 1024),
            Err(FilesError::EmptyTree)
        ));
    }

    #[test]
    fn test_chunk_verification() {
        let data = vec![0xAA; 512 * 1024];
        let tree = compute_tree_hash_from_data(&data, 256 * 1024).unwrap();

        let chunk = vec![0xAA; 256 * 1024];
        assert!(tree.verify_chunk(0, &chunk));

        let wrong_chunk = vec![0xBB; 256 * 1024];
        assert!(!tree.verify_chunk(0, &wrong_chunk));
        assert!(!tree.verify_chunk(2, &chunk));
    }

    #[test]
    fn test_merkle_root_single_leaf() {
        let leaves = [leaf(1)];
        assert_eq!(compute_merkle_root(&leaves).unwrap(), leaves[0]);
    }

    #[test]
    fn test_merkle_root_empty() {
        assert!(matches!(compute_merkle_root(&[]), Err(FilesError::EmptyTree)));
        assert!(matches!(IntegrityTree::build(Vec::new()), Err(FilesError::EmptyTree)));
    }

    #[test]
    fn test_merkle_root_two_leaves() {
        let leaves = [leaf(1), leaf(2)];
        let mut concat = Vec::new();
        concat.extend_from_slice(leaves[0].as_bytes());
        concat.extend_from_slice(leaves[1].as_bytes());

        assert_eq!(compute_merkle_root(&leaves).unwrap(), hash_chunk(&concat));
    }

    #[test]
    fn test_merkle_root_five_leaves_duplicates_odd_node() {
        let l: Vec<ChunkDigest> = (1..=5).map(leaf).collect();

        // Level 1: (1,2) (3,4) (5,5)
        let a = hash_pair(&l[0], &l[1]);
        let b = hash_pair(&l[2], &l[3]);
        let c = hash_pair(&l[4], &l[4]);
        // Level 2: (a,b) (c,c)
        let d = hash_pair(&a, &b);
        let e = hash_pair(&c, &c);
        // Root
        let expected = hash_pair(&d, &e);

        assert_eq!(compute_merkle_root(&l).unwrap(), expected);
    }

    #[test]
    fn test_odd_node_is_not_promoted() {
        let l = [leaf(1), leaf(2), leaf(3)];
        let promoted = hash_pair(&hash_pair(&l[0], &l[1]), &l[2]);
        assert_ne!(compute_merkle_root(&l).unwrap(), promoted);
    }

    #[test]
    fn test_root_sensitive_to_leaf_change_and_order() {
        let leaves: Vec<ChunkDigest> = (1..=6).map(leaf).collect();
        let root = compute_merkle_root(&leaves).unwrap();

        for i in 0..leaves.len() {
            let mut altered = leaves.clone();
            altered[i] = leaf(100 + i as u8);
            assert_ne!(compute_merkle_root(&altered).unwrap(), root, "leaf {i}");
        }

        let mut swapped = leaves.clone();
        swapped.swap(0, 1);
        assert_ne!(compute_merkle_root(&swapped).unwrap(), root);
    }

    #[test]
    fn test_verify_root() {
        let tree = IntegrityTree::build(vec![leaf(1), leaf(2), leaf(3)]).unwrap();
        assert!(tree.verify(&tree.root()));
        assert!(!tree.verify(&leaf(9)));
        assert_eq!(tree.get_chunk_hash(1), Some(&leaf(2)));
        assert_eq!(tree.get_chunk_hash(3), None);
    }

    #[test]
    fn test_incremental_vs_batch() {
        let data: Vec<u8> = (0..1_000_000u32).map(|i| (i % 253) as u8).collect();

        let tree_batch = compute_tree_hash_from_data(&data, 256 * 1024).unwrap();

        let mut hasher = IncrementalTreeHasher::new(256 * 1024);
        for piece in data.chunks(64 * 1000) {
            hasher.update(piece);
        }
        let tree_incremental = hasher.finalize().unwrap();

        assert_eq!(tree_batch, tree_incremental);
    }

    #[test]
    fn test_incremental_hasher_buffering() {
        let mut hasher = IncrementalTreeHasher::new(1024);

        hasher.update(&[0xAA; 512]);
        assert_eq!(hasher.chunk_count(), 0);
        assert_eq!(hasher.buffered_bytes(), 512);

        hasher.update(&[0xBB; 512]);
        assert_eq!(hasher.chunk_count(), 1);
        assert_eq!(hasher.buffered_bytes(), 0);

        hasher.update(&[0xCC; 256]);
        assert_eq!(hasher.chunk_count(), 1);
        assert_eq!(hasher.buffered_bytes(), 256);

        let tree = hasher.finalize().unwrap();
        assert_eq!(tree.leaf_count(), 2); // 1 complete + 1 partial
    }

    #[test]
    fn test_incremental_empty_rejected() {
        let hasher = IncrementalTreeHasher::new(1024);
        assert!(matches!(hasher.finalize(), Err(FilesError::EmptyTree)));
    }
}

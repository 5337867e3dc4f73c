//! # chunkvault files
//!
//! Chunk-level building blocks for the chunkvault backup pipeline.
//!
//! This crate provides:
//! - Fixed-size file chunking over any byte source
//! - BLAKE3 content hashing with an optional memoizing cache
//! - A probabilistic membership filter for deduplication pre-checks
//! - BLAKE3 hash trees for whole-file integrity verification
//! - Order-independent, integrity-checked file reassembly
//!
//! ## Data flow
//!
//! ```text
//! backup:   bytes ──> FileChunker ──> ContentHasher ──> MembershipFilter
//!                                          │
//!                                          └──> IntegrityTree (root hash)
//!
//! restore:  chunks ──> ChunkAssembler ──> IntegrityTree check ──> bytes
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assembler;
pub mod chunker;
pub mod error;
pub mod filter;
pub mod hasher;
pub mod tree_hash;

pub use assembler::{ChunkAssembler, reassemble};
pub use chunker::{ByteSource, Chunk, FileChunker, FileSource};
pub use error::{FilesError, Result};
pub use filter::MembershipFilter;
pub use hasher::{ChunkDigest, ContentHasher, hash_chunk, verify_chunk};
pub use tree_hash::IntegrityTree;

/// Default chunk size (512 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;

/// Size of a chunk digest in bytes
pub const DIGEST_SIZE: usize = 32;

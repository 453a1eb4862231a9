//! Shared types for the replistore data path.
//!
//! This crate holds the chunk/object data model, the rolling transfer
//! digests, transfer configuration and the common error type shared by the
//! data-path crates.

pub mod config;
pub mod digest;
pub mod error;
pub mod types;

pub use config::TransferConfig;
pub use digest::{empty_payload_hash, ChunkDigest, TransferDigest};
pub use error::{CommonError, Result};
pub use types::{
    validate_chunk_list, CandidateSet, ChunkPosition, ChunkTarget, ObjectDescriptor, ReplicaSet,
    StoredChunk, READ_BLOCK_SIZE, WRITE_BLOCK_SIZE,
};

//! Replicated chunk data path: streaming uploads with per-position write
//! quorums, ranged downloads with in-order replica failover, and best-effort
//! chunk deletion.
//!
//! The crate talks to storage nodes over their chunked-transfer HTTP wire
//! protocol and to the directory/catalog services through the seams in
//! [`directory`]. [`client::BlobClient`] ties the pieces together.

pub mod client;
pub mod conn;
pub mod delete;
pub mod directory;
pub mod download;
pub mod error;
pub mod upload;
pub mod wire;

mod replicate;
mod writer;

pub use client::BlobClient;
pub use delete::{ChunkDeleter, DeleteReport};
pub use directory::{ChunkDirectory, MemoryCatalog, MemoryDirectory, ObjectCatalog};
pub use download::{ByteStream, StreamDownloader};
pub use error::{BlobError, Result};
pub use upload::{StreamUploader, UploadOutcome};

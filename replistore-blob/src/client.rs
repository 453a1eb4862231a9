//! High-level object operations composing the transfer engines with the
//! directory and catalog seams.

use std::sync::Arc;
use tokio::io::AsyncRead;
use tracing::{info, warn};

use replistore_common::{ObjectDescriptor, TransferConfig};

use crate::delete::{ChunkDeleter, DeleteReport};
use crate::directory::{ChunkDirectory, ObjectCatalog};
use crate::download::{ByteStream, StreamDownloader};
use crate::error::Result;
use crate::upload::StreamUploader;

/// Client facade over the replicated chunk data path.
pub struct BlobClient {
    directory: Arc<dyn ChunkDirectory>,
    catalog: Arc<dyn ObjectCatalog>,
    config: TransferConfig,
}

impl BlobClient {
    pub fn new(
        directory: Arc<dyn ChunkDirectory>,
        catalog: Arc<dyn ObjectCatalog>,
        config: TransferConfig,
    ) -> Self {
        Self {
            directory,
            catalog,
            config,
        }
    }

    /// Streams an object in and records its metadata.
    ///
    /// Metadata is persisted only after every position met its write
    /// quorum, so a failed upload leaves no descriptor behind; any replicas
    /// it did write are orphans for the storage nodes to collect.
    pub async fn put_object<R>(
        &self,
        name: &str,
        content_type: &str,
        source: &mut R,
        size: u64,
    ) -> Result<ObjectDescriptor>
    where
        R: AsyncRead + Unpin,
    {
        let candidates = self.directory.resolve_candidates(name, size).await?;
        let uploader = StreamUploader::new(&self.config);
        let outcome = uploader.upload(name, source, size, &candidates).await?;

        let descriptor = ObjectDescriptor {
            name: name.to_string(),
            size: outcome.size,
            hash: outcome.hash,
            content_type: content_type.to_string(),
            chunks: outcome.chunks,
        };
        descriptor.validate()?;
        self.catalog.persist_descriptor(&descriptor).await?;
        info!(
            "Stored object {} ({} bytes, {} positions)",
            name,
            descriptor.size,
            descriptor.chunks.len()
        );
        Ok(descriptor)
    }

    /// Opens a ranged read over an object. `size: None` reads to the end.
    pub async fn get_object(
        &self,
        name: &str,
        offset: u64,
        size: Option<u64>,
    ) -> Result<(ObjectDescriptor, ByteStream)> {
        let descriptor = self.catalog.fetch_descriptor(name).await?;
        let stream = StreamDownloader::new(self.config.clone()).download(
            descriptor.chunks.clone(),
            descriptor.size,
            offset,
            size,
        )?;
        Ok((descriptor, stream))
    }

    /// Fetches metadata without touching any chunk.
    pub async fn head_object(&self, name: &str) -> Result<ObjectDescriptor> {
        self.catalog.fetch_descriptor(name).await
    }

    /// Best-effort removal of every replica of an object's chunks. The
    /// report says how many replicas were actually deleted; metadata
    /// removal is the caller's concern, after this returns.
    pub async fn delete_object(&self, name: &str) -> Result<DeleteReport> {
        let sets = self.directory.chunk_list(name).await?;
        let replicas: Vec<_> = sets.into_iter().flat_map(|set| set.chunks).collect();
        let report = ChunkDeleter::new(self.config.clone()).delete_all(&replicas).await;
        if !report.fully_deleted() {
            warn!(
                "Object {}: {} of {} replicas left behind",
                name,
                report.attempted - report.deleted,
                report.attempted
            );
        }
        Ok(report)
    }
}

//! Best-effort fan-out deletion of chunk replicas.

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

use replistore_common::{StoredChunk, TransferConfig};

use crate::conn::ChunkConnection;
use crate::error::{BlobError, Result};
use crate::wire::delete_request_head;

/// Tally of a delete pass. Replicas that could not be deleted are left for
/// the storage nodes' own garbage collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub attempted: usize,
    pub deleted: usize,
}

impl DeleteReport {
    pub fn fully_deleted(&self) -> bool {
        self.deleted == self.attempted
    }
}

pub struct ChunkDeleter {
    config: TransferConfig,
}

impl ChunkDeleter {
    pub fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    /// Deletes every replica with bounded parallelism. Individual failures
    /// are logged and counted, never propagated.
    pub async fn delete_all(&self, chunks: &[StoredChunk]) -> DeleteReport {
        let deleted = AtomicUsize::new(0);
        let parallelism = self.config.delete_concurrency.max(1);

        stream::iter(chunks)
            .for_each_concurrent(parallelism, |chunk| {
                let deleted = &deleted;
                async move {
                    match self.delete_one(chunk).await {
                        Ok(()) => {
                            debug!("Deleted chunk {}", chunk.url);
                            deleted.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(error) => {
                            warn!("Failed to delete chunk {}: {}", chunk.url, error);
                        }
                    }
                }
            })
            .await;

        let report = DeleteReport {
            attempted: chunks.len(),
            deleted: deleted.into_inner(),
        };
        info!(
            "Deleted {} of {} chunk replicas",
            report.deleted, report.attempted
        );
        report
    }

    async fn delete_one(&self, chunk: &StoredChunk) -> Result<()> {
        let mut conn = ChunkConnection::connect(&chunk.url, self.config.connect_timeout).await?;
        let request = delete_request_head(conn.target());
        conn.send(request.as_bytes(), self.config.write_timeout)
            .await?;
        let response = conn.read_head(self.config.read_timeout).await?;
        if !response.is_success() {
            return Err(BlobError::Protocol(format!(
                "replica {} answered {}",
                chunk.url, response.status
            )));
        }
        Ok(())
    }
}

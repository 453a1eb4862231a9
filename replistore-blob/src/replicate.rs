//! Fan-out of a single chunk position to its replica set.
//!
//! `ReplicatedWriteGroup` spawns one writer task per candidate target and
//! multiplexes payload fragments to all of them through bounded queues. A
//! replica whose queue closed mid-stream (its writer hit an error) is simply
//! dropped from the fan-out; the group fails only when the survivors can no
//! longer satisfy the write quorum.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use replistore_common::{
    digest::ChunkDigest, ChunkPosition, CandidateSet, ReplicaSet, StoredChunk, TransferConfig,
};

use crate::error::{BlobError, Result};
use crate::wire::WriteAnnounce;
use crate::writer::{run_writer, ReplicaOutcome, WriterContext};

/// Object-level facts shared by every position of an upload.
#[derive(Debug, Clone)]
pub(crate) struct ObjectAnnounce {
    pub path: String,
    pub size: u64,
    pub chunk_count: u32,
}

pub(crate) struct ReplicatedWriteGroup {
    position: ChunkPosition,
    quorum: usize,
    senders: Vec<mpsc::Sender<Bytes>>,
    handles: Vec<JoinHandle<ReplicaOutcome>>,
    digest: ChunkDigest,
}

impl ReplicatedWriteGroup {
    /// Spawns one writer task per candidate target.
    pub fn open(
        candidates: &CandidateSet,
        object: &ObjectAnnounce,
        config: &TransferConfig,
    ) -> Self {
        let mut senders = Vec::with_capacity(candidates.targets.len());
        let mut handles = Vec::with_capacity(candidates.targets.len());

        for target in &candidates.targets {
            let (tx, rx) = mpsc::channel(config.send_queue_depth);
            let ctx = WriterContext {
                target: target.clone(),
                announce: WriteAnnounce {
                    content_path: object.path.clone(),
                    content_size: object.size,
                    chunk_count: object.chunk_count,
                    position: candidates.position,
                    chunk_id: target.chunk_id.clone(),
                },
                blocks: rx,
                connect_timeout: config.connect_timeout,
                write_timeout: config.write_timeout,
                read_timeout: config.read_timeout,
            };
            senders.push(tx);
            handles.push(tokio::spawn(run_writer(ctx)));
        }

        debug!(
            "Opened write group for position {} with {} replicas (quorum {})",
            candidates.position,
            senders.len(),
            config.quorum
        );

        Self {
            position: candidates.position,
            quorum: config.quorum,
            senders,
            handles,
            digest: ChunkDigest::new(),
        }
    }

    /// Feeds one payload fragment to every live replica.
    ///
    /// A replica whose queue is closed is dropped from the fan-out. Fails
    /// early once fewer than `quorum` replicas remain: the position can no
    /// longer succeed so there is no point streaming the rest of the chunk.
    pub async fn push(&mut self, block: Bytes) -> Result<()> {
        self.digest.update(&block);

        let mut alive = Vec::with_capacity(self.senders.len());
        for tx in self.senders.drain(..) {
            if tx.send(block.clone()).await.is_ok() {
                alive.push(tx);
            }
        }
        self.senders = alive;

        if self.senders.len() < self.quorum {
            return Err(BlobError::QuorumFailed {
                position: self.position,
                required: self.quorum,
                successful: self.senders.len(),
            });
        }
        Ok(())
    }

    /// Closes the queues, collects every writer outcome and enforces the
    /// quorum. Returns the replica set recording where the chunk landed.
    pub async fn finish(self) -> Result<ReplicaSet> {
        let Self {
            position,
            quorum,
            senders,
            handles,
            digest,
        } = self;

        // Closing the queues lets the writers send the final frame and read
        // the replica response.
        drop(senders);

        let size = digest.len();
        let hash = digest.finalize();

        let mut chunks = Vec::with_capacity(handles.len());
        for handle in handles {
            match handle.await? {
                ReplicaOutcome::Stored {
                    target,
                    size: accepted,
                } => {
                    if accepted == size {
                        chunks.push(StoredChunk {
                            position,
                            url: target.url,
                            chunk_id: target.chunk_id,
                            size,
                            hash: hash.clone(),
                        });
                    } else {
                        // Can only happen when the writer missed fragments
                        // after its queue was dropped from the fan-out.
                        warn!(
                            "Replica {} stored {} of {} bytes for position {}, discarding",
                            target.url, accepted, size, position
                        );
                    }
                }
                ReplicaOutcome::Failed { target, error } => {
                    debug!(
                        "Replica {} dropped from position {}: {}",
                        target.url, position, error
                    );
                }
            }
        }

        if chunks.len() < quorum {
            return Err(BlobError::QuorumFailed {
                position,
                required: quorum,
                successful: chunks.len(),
            });
        }

        info!(
            "Position {} stored on {} replicas ({} bytes, hash {})",
            position,
            chunks.len(),
            size,
            hash
        );
        Ok(ReplicaSet { position, chunks })
    }
}

//! Per-replica chunk writer.
//!
//! One writer task owns exactly one connection to one candidate replica. It
//! receives payload fragments over a bounded queue, frames them, and reports
//! a typed outcome once the queue closes. All state lives in the worker
//! context; nothing is shared with the other replicas of the position.

use bytes::Bytes;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use replistore_common::ChunkTarget;

use crate::conn::ChunkConnection;
use crate::error::{BlobError, Result};
use crate::wire::{frame_fragment, put_request_head, WriteAnnounce, FINAL_FRAME};

/// Immutable context handed to one writer task.
pub(crate) struct WriterContext {
    pub target: ChunkTarget,
    pub announce: WriteAnnounce,
    pub blocks: mpsc::Receiver<Bytes>,
    pub connect_timeout: Duration,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
}

/// Result reported by one writer task.
pub(crate) enum ReplicaOutcome {
    /// The replica accepted every byte and answered with a success status
    Stored { target: ChunkTarget, size: u64 },
    /// The replica failed; the error names the first fault seen
    Failed { target: ChunkTarget, error: BlobError },
}

pub(crate) async fn run_writer(mut ctx: WriterContext) -> ReplicaOutcome {
    match write_replica(&mut ctx).await {
        Ok(size) => {
            debug!(
                "Replica {} accepted chunk {} ({} bytes)",
                ctx.target.url, ctx.announce.chunk_id, size
            );
            ReplicaOutcome::Stored {
                target: ctx.target,
                size,
            }
        }
        Err(error) => {
            warn!(
                "Replica {} failed for chunk {}: {}",
                ctx.target.url, ctx.announce.chunk_id, error
            );
            ReplicaOutcome::Failed {
                target: ctx.target,
                error,
            }
        }
    }
}

async fn write_replica(ctx: &mut WriterContext) -> Result<u64> {
    let mut conn = ChunkConnection::connect(&ctx.target.url, ctx.connect_timeout).await?;

    // Announce path, object size, chunk count, position and id before any
    // payload byte.
    let head = put_request_head(conn.target(), &ctx.announce);
    conn.send(head.as_bytes(), ctx.write_timeout).await?;

    let mut size = 0u64;
    while let Some(block) = ctx.blocks.recv().await {
        conn.send(&frame_fragment(&block), ctx.write_timeout).await?;
        size += block.len() as u64;
    }

    conn.send(FINAL_FRAME, ctx.write_timeout).await?;

    let response = conn.read_head(ctx.read_timeout).await?;
    if !response.is_success() {
        return Err(BlobError::Protocol(format!(
            "replica {} answered {}",
            ctx.target.url, response.status
        )));
    }
    Ok(size)
}

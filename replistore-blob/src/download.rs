//! Ranged streaming download with in-order replica failover.
//!
//! The requested byte window is first mapped onto the chunk list, producing
//! a per-position `(skip, want)` plan. A reader then serves each position in
//! order, cycling through its replicas: a replica that refuses or breaks the
//! connection is marked failed for that position, while one that merely
//! stalls stays eligible and the reader fast-forwards to the next replica
//! from the exact byte where delivery stopped.

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use replistore_common::{
    digest::ChunkDigest, validate_chunk_list, ReplicaSet, TransferConfig, READ_BLOCK_SIZE,
};

use crate::conn::ChunkConnection;
use crate::error::{BlobError, Result};
use crate::wire::{get_request_head, range_value, HDR_CHUNK_HASH};

/// Stream of payload fragments produced by a download.
pub type ByteStream = ReceiverStream<Result<Bytes>>;

/// One position's share of the requested byte window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PositionRead {
    /// Index into the chunk list
    pub index: usize,
    /// Bytes to skip at the start of the chunk
    pub skip: u64,
    /// Bytes to deliver from this chunk
    pub want: u64,
}

/// Maps a byte window onto the chunk list.
///
/// `size: None` means "to the end of the object". A zero-length window is
/// valid and yields an empty plan; a window reaching past the object end is
/// rejected.
pub(crate) fn plan_window(
    chunks: &[ReplicaSet],
    object_size: u64,
    offset: u64,
    size: Option<u64>,
) -> Result<Vec<PositionRead>> {
    validate_chunk_list(chunks)?;
    let total: u64 = chunks.iter().map(|set| set.size()).sum();
    if total != object_size {
        return Err(BlobError::InvalidChunkList(format!(
            "chunk sizes sum to {} but object size is {}",
            total, object_size
        )));
    }

    let want_total = match size {
        Some(size) => size,
        None => object_size.saturating_sub(offset),
    };
    if offset > object_size || want_total > object_size - offset {
        return Err(BlobError::InvalidRange {
            offset,
            size: want_total,
            object_size,
        });
    }
    if want_total == 0 {
        return Ok(Vec::new());
    }

    let mut plan = Vec::new();
    let mut chunk_start = 0u64;
    let mut remaining = want_total;
    for (index, set) in chunks.iter().enumerate() {
        let chunk_size = set.size();
        let chunk_end = chunk_start + chunk_size;
        if offset < chunk_end && remaining > 0 {
            let skip = offset.saturating_sub(chunk_start);
            let want = (chunk_size - skip).min(remaining);
            if want > 0 {
                plan.push(PositionRead { index, skip, want });
                remaining -= want;
            }
        }
        chunk_start = chunk_end;
        if remaining == 0 {
            break;
        }
    }
    Ok(plan)
}

/// Serves one chunk position from its replica set.
pub(crate) struct ChunkReader<'a> {
    config: &'a TransferConfig,
}

/// Why `read_position` stopped.
pub(crate) enum PositionEnd {
    /// Every requested byte was delivered
    Complete,
    /// The consumer dropped the stream; stop quietly
    ConsumerGone,
}

impl<'a> ChunkReader<'a> {
    pub fn new(config: &'a TransferConfig) -> Self {
        Self { config }
    }

    /// Delivers `want` bytes of the position, starting `skip` bytes in,
    /// failing over between replicas as needed.
    pub async fn read_position(
        &self,
        set: &ReplicaSet,
        skip: u64,
        want: u64,
        out: &mpsc::Sender<Result<Bytes>>,
    ) -> Result<PositionEnd> {
        let chunk_size = set.size();
        // The recorded hash covers the whole chunk, so it can only be
        // checked when the full payload flows through.
        let verify = skip == 0 && want == chunk_size;
        let mut digest = if verify { Some(ChunkDigest::new()) } else { None };

        let mut delivered = 0u64;
        let mut failed = vec![false; set.chunks.len()];
        let mut cursor = 0usize;
        let mut attempts = 0usize;
        // Every supplied replica gets at least one attempt, however low the
        // configured cap.
        let attempt_cap = self.config.max_read_attempts.max(set.chunks.len());

        'candidates: while delivered < want {
            if attempts >= attempt_cap {
                return Err(BlobError::ReplicasExhausted {
                    position: set.position,
                });
            }
            let Some(index) = next_candidate(&failed, &mut cursor) else {
                return Err(BlobError::ReplicasExhausted {
                    position: set.position,
                });
            };
            attempts += 1;

            let replica = &set.chunks[index];
            let start = skip + delivered;
            // Open-ended range when reading through the chunk end, so a
            // replica can serve it as a plain tail read.
            let range = if skip + want == chunk_size {
                range_value(start, None)
            } else {
                range_value(start, Some(skip + want - 1))
            };

            let mut conn = match ChunkConnection::connect(&replica.url, self.config.connect_timeout)
                .await
            {
                Ok(conn) => conn,
                Err(error) => {
                    warn!("Replica {} unreachable: {}", replica.url, error);
                    failed[index] = true;
                    continue;
                }
            };
            let request = get_request_head(conn.target(), &range);
            if let Err(error) = conn
                .send(request.as_bytes(), self.config.write_timeout)
                .await
            {
                warn!("Replica {} rejected the read request: {}", replica.url, error);
                failed[index] = true;
                continue;
            }
            let head = match conn.read_head(self.config.read_timeout).await {
                Ok(head) => head,
                Err(BlobError::ReadTimeout { url }) => {
                    debug!(
                        "Replica {} stalled before answering, trying the next one",
                        url
                    );
                    continue;
                }
                Err(error) => {
                    warn!("Replica {} broke the connection: {}", replica.url, error);
                    failed[index] = true;
                    continue;
                }
            };
            if head.status != 200 && head.status != 206 {
                warn!(
                    "Replica {} answered {} for range {}",
                    replica.url, head.status, range
                );
                failed[index] = true;
                continue;
            }
            // A replica advertising a different full-chunk hash than the
            // chunk list records is stale or corrupt for any range; reject
            // it before streaming its body.
            if let (Some(advertised), Some(expected)) =
                (head.header(HDR_CHUNK_HASH), set.hash())
            {
                if advertised != expected {
                    warn!(
                        "Replica {} advertises hash {} but the chunk list records {}",
                        replica.url, advertised, expected
                    );
                    failed[index] = true;
                    continue;
                }
            }

            while delivered < want {
                let cap = READ_BLOCK_SIZE.min((want - delivered) as usize);
                let block = match conn.recv_body(cap, self.config.read_timeout).await {
                    Ok(block) => block,
                    Err(BlobError::ReadTimeout { url }) => {
                        // Stalled mid-body: the replica stays eligible, the
                        // next one resumes from the exact byte reached.
                        debug!(
                            "Replica {} stalled at chunk offset {}, fast-forwarding",
                            url,
                            skip + delivered
                        );
                        continue 'candidates;
                    }
                    Err(error) => {
                        warn!("Replica {} broke mid-body: {}", replica.url, error);
                        failed[index] = true;
                        continue 'candidates;
                    }
                };
                if block.is_empty() {
                    // Closed before delivering the promised range.
                    warn!(
                        "Replica {} ended {} bytes short at position {}",
                        replica.url,
                        want - delivered,
                        set.position
                    );
                    failed[index] = true;
                    continue 'candidates;
                }
                if let Some(digest) = digest.as_mut() {
                    digest.update(&block);
                }
                delivered += block.len() as u64;
                if out.send(Ok(block)).await.is_err() {
                    return Ok(PositionEnd::ConsumerGone);
                }
            }
        }

        if let Some(digest) = digest.take() {
            if let Some(expected) = set.hash() {
                let actual = digest.finalize();
                if actual != expected {
                    // Some of the corrupt payload was already handed to the
                    // consumer, so the download cannot fail over; it aborts.
                    return Err(BlobError::ChunkHashMismatch {
                        position: set.position,
                        expected: expected.to_string(),
                        actual,
                    });
                }
            }
        }
        Ok(PositionEnd::Complete)
    }
}

/// Picks the next non-failed replica index, cycling from `cursor`.
fn next_candidate(failed: &[bool], cursor: &mut usize) -> Option<usize> {
    let n = failed.len();
    for step in 0..n {
        let index = (*cursor + step) % n;
        if !failed[index] {
            *cursor = (index + 1) % n;
            return Some(index);
        }
    }
    None
}

/// Streams a byte window of an object by reading its positions in order.
pub struct StreamDownloader {
    config: TransferConfig,
}

impl StreamDownloader {
    pub fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    /// Plans the window eagerly, then spawns a producer task that feeds the
    /// returned stream. Transfer failures surface as the final stream item.
    pub fn download(
        &self,
        chunks: Vec<ReplicaSet>,
        object_size: u64,
        offset: u64,
        size: Option<u64>,
    ) -> Result<ByteStream> {
        let plan = plan_window(&chunks, object_size, offset, size)?;
        let (tx, rx) = mpsc::channel(4);
        let config = self.config.clone();

        tokio::spawn(async move {
            let reader = ChunkReader::new(&config);
            for item in plan {
                let set = &chunks[item.index];
                match reader.read_position(set, item.skip, item.want, &tx).await {
                    Ok(PositionEnd::Complete) => {}
                    Ok(PositionEnd::ConsumerGone) => return,
                    Err(error) => {
                        let _ = tx.send(Err(error)).await;
                        return;
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}

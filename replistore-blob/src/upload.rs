//! Streaming upload of an object across its planned chunk positions.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use replistore_common::{
    digest::TransferDigest, CandidateSet, ReplicaSet, TransferConfig, WRITE_BLOCK_SIZE,
};

use crate::error::{BlobError, Result};
use crate::replicate::{ObjectAnnounce, ReplicatedWriteGroup};

/// What an upload produced: where every chunk landed, plus the size and
/// rolling hash of the bytes actually read from the source.
#[derive(Debug)]
pub struct UploadOutcome {
    pub chunks: Vec<ReplicaSet>,
    pub size: u64,
    pub hash: String,
}

/// Drives a source stream through the candidate sets, position by position.
///
/// Positions are written sequentially; within a position every replica is
/// written concurrently by [`ReplicatedWriteGroup`]. The source is read in
/// blocks of at most [`WRITE_BLOCK_SIZE`] bytes, clamped to the remaining
/// budget of the current position.
pub struct StreamUploader<'a> {
    config: &'a TransferConfig,
}

impl<'a> StreamUploader<'a> {
    pub fn new(config: &'a TransferConfig) -> Self {
        Self { config }
    }

    pub async fn upload<R>(
        &self,
        path: &str,
        source: &mut R,
        declared_size: u64,
        candidates: &[CandidateSet],
    ) -> Result<UploadOutcome>
    where
        R: AsyncRead + Unpin,
    {
        validate_candidates(candidates)?;

        let object = ObjectAnnounce {
            path: path.to_string(),
            size: declared_size,
            chunk_count: candidates.len() as u32,
        };

        let mut object_digest = TransferDigest::new();
        let mut object_size = 0u64;
        let mut chunks = Vec::new();
        let mut lookahead: Option<Bytes> = None;
        let mut source_done = false;

        for set in candidates {
            let budget = set.planned_size;

            // Open a position only once we know it will carry at least one
            // byte. An empty source never opens any connection.
            if lookahead.is_none() && !source_done {
                let cap = (WRITE_BLOCK_SIZE as u64).min(budget) as usize;
                lookahead = read_block(source, cap).await?;
                source_done = lookahead.is_none();
            }
            if source_done && lookahead.is_none() {
                break;
            }

            let mut group = ReplicatedWriteGroup::open(set, &object, self.config);
            let mut written = 0u64;

            while written < budget {
                let block = match lookahead.take() {
                    Some(block) => block,
                    None => {
                        let cap = (WRITE_BLOCK_SIZE as u64).min(budget - written) as usize;
                        match read_block(source, cap).await? {
                            Some(block) => block,
                            None => {
                                source_done = true;
                                break;
                            }
                        }
                    }
                };
                written += block.len() as u64;
                object_size += block.len() as u64;
                object_digest.update(&block);
                group.push(block).await?;
            }

            debug!(
                "Position {} filled with {} of {} planned bytes",
                set.position, written, budget
            );
            chunks.push(group.finish().await?);
        }

        // Every position is full but the source may still hold bytes the
        // plan has no room for.
        if !source_done && lookahead.is_none() {
            lookahead = read_block(source, 1).await?;
        }
        if lookahead.is_some() {
            return Err(BlobError::Protocol(
                "source stream exceeds planned chunk capacity".to_string(),
            ));
        }

        let hash = object_digest.finalize();
        info!(
            "Uploaded {} ({} bytes over {} positions, hash {})",
            path,
            object_size,
            chunks.len(),
            hash
        );
        Ok(UploadOutcome {
            chunks,
            size: object_size,
            hash,
        })
    }
}

fn validate_candidates(candidates: &[CandidateSet]) -> Result<()> {
    for (index, set) in candidates.iter().enumerate() {
        if set.position != index as u32 {
            return Err(BlobError::InvalidChunkList(format!(
                "candidate position {} at index {}",
                set.position, index
            )));
        }
        if set.targets.is_empty() {
            return Err(BlobError::InvalidChunkList(format!(
                "position {} has no candidate targets",
                set.position
            )));
        }
        if set.planned_size == 0 {
            return Err(BlobError::InvalidChunkList(format!(
                "position {} has a zero planned size",
                set.position
            )));
        }
    }
    Ok(())
}

/// Reads up to `cap` bytes from the source. `None` means end of stream.
/// Source failures are fatal for the whole upload, there is nothing to
/// retry against.
async fn read_block<R>(source: &mut R, cap: usize) -> Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; cap];
    let read = source.read(&mut buf).await.map_err(BlobError::SourceRead)?;
    if read == 0 {
        return Ok(None);
    }
    buf.truncate(read);
    Ok(Some(Bytes::from(buf)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use replistore_common::ChunkTarget;

    fn set(position: u32, planned: u64) -> CandidateSet {
        CandidateSet {
            position,
            planned_size: planned,
            targets: vec![ChunkTarget {
                url: "http://127.0.0.1:1/x".to_string(),
                chunk_id: "x".to_string(),
            }],
        }
    }

    #[test]
    fn candidate_positions_must_be_dense() {
        let sets = vec![set(0, 10), set(2, 10)];
        assert!(validate_candidates(&sets).is_err());
    }

    #[test]
    fn candidate_sets_need_targets() {
        let mut only = set(0, 10);
        only.targets.clear();
        assert!(validate_candidates(&[only]).is_err());
    }

    #[tokio::test]
    async fn empty_source_opens_no_connections() {
        // The single candidate target is unroutable; an empty upload must
        // succeed without ever dialing it.
        let config = TransferConfig::default();
        let uploader = StreamUploader::new(&config);
        let mut source: &[u8] = b"";
        let outcome = uploader
            .upload("obj", &mut source, 0, &[set(0, 1024)])
            .await
            .unwrap();
        assert!(outcome.chunks.is_empty());
        assert_eq!(outcome.size, 0);
        assert_eq!(outcome.hash, replistore_common::digest::empty_payload_hash());
    }
}

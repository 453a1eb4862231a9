use serde::{Deserialize, Serialize};

use crate::error::CommonError;

/// Granularity of source reads while uploading a chunk
pub const WRITE_BLOCK_SIZE: usize = 0x10000; // 64KB

/// Granularity of socket reads while downloading a chunk
pub const READ_BLOCK_SIZE: usize = 0x10000; // 64KB

/// Ordinal index of a chunk within an object. All replicas of the same
/// slice share a position; erasure-coded sub-positions are not supported.
pub type ChunkPosition = u32;

/// A replica location chosen by the directory service but not yet written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkTarget {
    /// Chunk URL on the storage node, e.g. `http://10.0.0.1:6010/AB12`
    pub url: String,
    /// Identifier of the chunk on the storage node
    pub chunk_id: String,
}

/// Planned replica set for one chunk position, produced by the directory
/// service before an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub position: ChunkPosition,
    /// Byte budget for this position; storage services may legitimately
    /// hand out non-uniform chunk sizes.
    pub planned_size: u64,
    pub targets: Vec<ChunkTarget>,
}

/// A chunk replica that was durably written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub position: ChunkPosition,
    pub url: String,
    pub chunk_id: String,
    /// Bytes actually transferred to this replica, not the planned size
    pub size: u64,
    /// Hex digest of the chunk payload, identical across the replica set
    pub hash: String,
}

/// The group of replicas holding copies of one chunk position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaSet {
    pub position: ChunkPosition,
    pub chunks: Vec<StoredChunk>,
}

impl ReplicaSet {
    /// Size of this position's payload, taken from the first replica.
    /// All members of a durably written set record the same size.
    pub fn size(&self) -> u64 {
        self.chunks.first().map(|c| c.size).unwrap_or(0)
    }

    /// Payload hash shared by the replica set, if any replica is present.
    pub fn hash(&self) -> Option<&str> {
        self.chunks.first().map(|c| c.hash.as_str())
    }
}

/// Object metadata as persisted by the catalog layer after a successful
/// upload. Immutable once finalized; superseded rather than mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    pub name: String,
    pub size: u64,
    /// Hex digest of the concatenation of all chunk payloads in position order
    pub hash: String,
    pub content_type: String,
    pub chunks: Vec<ReplicaSet>,
}

impl ObjectDescriptor {
    /// Check the structural invariants of the descriptor's chunk list.
    pub fn validate(&self) -> Result<(), CommonError> {
        validate_chunk_list(&self.chunks)?;
        let total: u64 = self.chunks.iter().map(|set| set.size()).sum();
        if total != self.size {
            return Err(CommonError::InvalidChunkList(format!(
                "chunk sizes sum to {} but object size is {}",
                total, self.size
            )));
        }
        Ok(())
    }
}

/// Validate that a chunk list has gap-free ascending positions, that every
/// position has at least one replica, and that replicas within a set agree
/// on size and hash.
pub fn validate_chunk_list(chunks: &[ReplicaSet]) -> Result<(), CommonError> {
    for (index, set) in chunks.iter().enumerate() {
        if set.position != index as ChunkPosition {
            return Err(CommonError::InvalidChunkList(format!(
                "expected position {} at index {}, found {}",
                index, index, set.position
            )));
        }
        let Some(first) = set.chunks.first() else {
            return Err(CommonError::InvalidChunkList(format!(
                "position {} has no replicas",
                set.position
            )));
        };
        for chunk in &set.chunks {
            if chunk.position != set.position {
                return Err(CommonError::InvalidChunkList(format!(
                    "replica {} carries position {} inside set {}",
                    chunk.url, chunk.position, set.position
                )));
            }
            if chunk.size != first.size || chunk.hash != first.hash {
                return Err(CommonError::InvalidChunkList(format!(
                    "replica {} disagrees with its set at position {}",
                    chunk.url, set.position
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(position: ChunkPosition, url: &str, size: u64, hash: &str) -> StoredChunk {
        StoredChunk {
            position,
            url: url.to_string(),
            chunk_id: format!("chunk-{}", url),
            size,
            hash: hash.to_string(),
        }
    }

    fn descriptor() -> ObjectDescriptor {
        ObjectDescriptor {
            name: "media/video.bin".to_string(),
            size: 96,
            hash: "aabb".to_string(),
            content_type: "application/octet-stream".to_string(),
            chunks: vec![
                ReplicaSet {
                    position: 0,
                    chunks: vec![stored(0, "http://a:6010/0", 64, "h0"), stored(0, "http://b:6010/0", 64, "h0")],
                },
                ReplicaSet {
                    position: 1,
                    chunks: vec![stored(1, "http://a:6010/1", 32, "h1")],
                },
            ],
        }
    }

    #[test]
    fn test_validate_ok() {
        descriptor().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_gap() {
        let mut desc = descriptor();
        desc.chunks[1].position = 2;
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_disagreeing_replica() {
        let mut desc = descriptor();
        desc.chunks[0].chunks[1].size = 63;
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_size_mismatch() {
        let mut desc = descriptor();
        desc.size = 100;
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_descriptor_serialization() {
        let desc = descriptor();
        let serialized = serde_json::to_string(&desc).unwrap();
        let deserialized: ObjectDescriptor = serde_json::from_str(&serialized).unwrap();
        assert_eq!(desc, deserialized);
    }
}

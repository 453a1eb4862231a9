//! Rolling transfer digests.
//!
//! Uploads accumulate two digests at once: one over the whole object stream
//! and one per chunk position. Both render as lowercase hex, which is the
//! form recorded in chunk and object metadata.

/// Digest over the full concatenated object payload, independent of chunk
/// boundaries or which replica served which position.
pub struct TransferDigest {
    context: md5::Context,
}

// The inner context has no Debug impl, so render only the type name.
impl std::fmt::Debug for TransferDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferDigest").finish_non_exhaustive()
    }
}

impl TransferDigest {
    pub fn new() -> Self {
        Self {
            context: md5::Context::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
    }

    pub fn finalize(self) -> String {
        hex::encode(self.context.compute().0)
    }
}

impl Default for TransferDigest {
    fn default() -> Self {
        Self::new()
    }
}

/// Digest over one chunk position's payload.
pub struct ChunkDigest {
    context: md5::Context,
    bytes: u64,
}

impl std::fmt::Debug for ChunkDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkDigest")
            .field("bytes", &self.bytes)
            .finish_non_exhaustive()
    }
}

impl ChunkDigest {
    pub fn new() -> Self {
        Self {
            context: md5::Context::new(),
            bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.context.consume(data);
        self.bytes += data.len() as u64;
    }

    /// Bytes consumed so far
    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    pub fn finalize(self) -> String {
        hex::encode(self.context.compute().0)
    }
}

impl Default for ChunkDigest {
    fn default() -> Self {
        Self::new()
    }
}

/// Digest of the zero-length payload, recorded for empty objects.
pub fn empty_payload_hash() -> String {
    hex::encode(md5::compute(&[] as &[u8]).0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_hash() {
        assert_eq!(empty_payload_hash(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let payload = b"the quick brown fox jumps over the lazy dog";
        let mut digest = TransferDigest::new();
        for block in payload.chunks(7) {
            digest.update(block);
        }
        assert_eq!(digest.finalize(), hex::encode(md5::compute(payload).0));
    }

    #[test]
    fn test_chunk_digest_tracks_length() {
        let mut digest = ChunkDigest::new();
        assert!(digest.is_empty());
        digest.update(&[0u8; 10]);
        digest.update(&[1u8; 5]);
        assert_eq!(digest.len(), 15);
    }

    #[test]
    fn test_digests_are_debuggable() {
        let mut digest = ChunkDigest::new();
        digest.update(&[0u8; 15]);
        assert!(format!("{:?}", digest).contains("bytes: 15"));
        assert!(format!("{:?}", TransferDigest::new()).contains("TransferDigest"));
    }
}

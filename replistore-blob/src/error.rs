use replistore_common::{ChunkPosition, CommonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connect timeout for {url}")]
    ConnectTimeout { url: String },

    #[error("Write timeout for {url}")]
    WriteTimeout { url: String },

    #[error("Read timeout for {url}")]
    ReadTimeout { url: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Quorum failed at position {position}: need {required}, have {successful}")]
    QuorumFailed {
        position: ChunkPosition,
        required: usize,
        successful: usize,
    },

    #[error("No replica could satisfy position {position}")]
    ReplicasExhausted { position: ChunkPosition },

    #[error("Chunk hash mismatch at position {position}: expected {expected}, actual {actual}")]
    ChunkHashMismatch {
        position: ChunkPosition,
        expected: String,
        actual: String,
    },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Invalid chunk list: {0}")]
    InvalidChunkList(String),

    #[error("Range not satisfiable: offset={offset} size={size} object_size={object_size}")]
    InvalidRange {
        offset: u64,
        size: u64,
        object_size: u64,
    },

    #[error("Source read failed: {0}")]
    SourceRead(std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task join error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<CommonError> for BlobError {
    fn from(error: CommonError) -> Self {
        match error {
            CommonError::Io(e) => BlobError::Io(e),
            CommonError::Serialization(e) => BlobError::Serialization(e),
            CommonError::InvalidChunkList(msg) => BlobError::InvalidChunkList(msg),
        }
    }
}

pub type Result<T> = std::result::Result<T, BlobError>;

use thiserror::Error;

/// Error type shared by the replistore crates
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid chunk list: {0}")]
    InvalidChunkList(String),
}

pub type Result<T> = std::result::Result<T, CommonError>;

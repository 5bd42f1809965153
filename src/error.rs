use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("authentication failed: {0}")]
    Auth(&'static str),

    #[error("store inconsistency: {0}")]
    Consistency(String),

    #[error("invalid block size: expected {expected} bytes, got {actual}")]
    InvalidBlockSize { expected: usize, actual: usize },

    #[error("invalid logical block id: {id} (device has {limit} blocks)")]
    InvalidBlockId { id: u32, limit: u32 },

    #[error("metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("key derivation failed")]
    KeyDerivation,
}

pub type Result<T> = std::result::Result<T, VaultError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("range out of bounds: offset {offset}, length {length}")]
    InvalidRange { offset: u64, length: u64 },

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("path traversal detected in file path: {0}")]
    PathTraversal(String),

    #[error("disk writer failed: {0}")]
    WriterFailed(String),

    #[error("disk writer closed")]
    WriterClosed,

    /// The writer's queue is full. Nothing was written; retrying later can
    /// succeed.
    #[error("disk writer busy")]
    WriterBusy,
}

//! Error types for logfs

use thiserror::Error;

/// Result type alias for logfs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in logfs operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid blob range: {0}")]
    InvalidBlob(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Offset {offset} out of range for {topic}-{partition}")]
    OffsetOutOfRange {
        topic: String,
        partition: i32,
        offset: i64,
    },

    #[error("No data available for {file}, offset={offset}, length={length}")]
    NoDataAvailable {
        file: String,
        offset: u64,
        length: u64,
    },

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("{0} is closed")]
    Closed(String),

    #[error("Config error: {0}")]
    Config(String),
}

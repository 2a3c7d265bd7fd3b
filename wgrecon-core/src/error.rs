//! Error types for wgrecon-core.

use thiserror::Error;

/// Result type alias for wgrecon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for reconstruction.
#[derive(Error, Debug)]
pub enum Error {
    /// Hit address outside the detector.
    #[error("invalid hit address: view={view} plane={plane} channel={channel}")]
    InvalidAddress { view: u8, plane: u8, channel: u8 },

    /// Non-finite energy proxy or time value.
    #[error("invalid hit value: {0}")]
    InvalidHitValue(&'static str),

    /// Event exceeds the configured hit-count cap.
    #[error("too many hits: {count} (limit {limit})")]
    TooManyHits { count: usize, limit: usize },

    /// Geometry lookup error.
    #[error("geometry error: {0}")]
    Geometry(#[from] GeometryError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Geometry lookup errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    /// Index outside one dimension of a lookup table.
    #[error("index {index} out of range for dimension {dimension} (length {len})")]
    OutOfRange {
        dimension: usize,
        index: usize,
        len: usize,
    },

    /// Index arity does not match the table shape.
    #[error("expected {expected} indices, got {got}")]
    Arity { expected: usize, got: usize },

    /// Address combination with no physical counterpart.
    #[error("unknown address: view={view} plane={plane} channel={channel}")]
    UnknownAddress { view: u8, plane: usize, channel: usize },
}

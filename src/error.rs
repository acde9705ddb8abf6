use thiserror::Error;

use crate::decoder::FrameMode;
use crate::sample::DeviceFamily;

/// Frame could not be turned into a `RawBatch`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{family:?} {mode:?} frame must be {expected} bytes, got {actual}")]
    Length {
        family: DeviceFamily,
        mode: FrameMode,
        expected: usize,
        actual: usize,
    },

    #[error("Battery level out of range: {0}")]
    Battery(u8),

    #[error("{family:?} frame ended after {len} bytes")]
    Truncated { family: DeviceFamily, len: usize },
}

/// Classifier invocation failure, scoped to a single window
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifierError {
    #[error("Input shape mismatch: expected {expected} values, got {actual}")]
    InputShape { expected: usize, actual: usize },

    #[error("Output shape mismatch: expected {expected} scores, got {actual}")]
    OutputShape { expected: usize, actual: usize },

    #[error("Model failed: {0}")]
    Model(String),
}

/// Persistence collaborator failure
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Session-level error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Session already running")]
    AlreadyRunning,

    #[error("Session not running")]
    NotRunning,

    #[error("Invalid session state: {0}")]
    InvalidState(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for session operations
pub type PResult<T> = Result<T, PipelineError>;

//! Error types for Gridmix

use thiserror::Error;

/// Engine-wide error type
///
/// Underrun/Overrun are non-fatal: on the realtime path they are reported
/// through the status registry rather than returned, and silence (or a
/// dropped block) substitutes for the missing data.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("format mismatch: {0}")]
    FormatMismatch(String),

    #[error("graph contains a cycle: {0}")]
    CyclicGraph(String),

    #[error("allocation failed: {0}")]
    Alloc(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("driver error: {0}")]
    Driver(String),

    #[error("underrun: {0}")]
    Underrun(String),

    #[error("overrun: {0}")]
    Overrun(String),

    #[error("timed out: {0}")]
    Timeout(String),
}

/// Result type alias
pub type EngineResult<T> = Result<T, EngineError>;

//! File I/O error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("resample error: {0}")]
    Resample(String),
}

pub type FileResult<T> = Result<T, FileError>;

impl From<FileError> for gm_core::EngineError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::Io(e) => gm_core::EngineError::Io(e),
            other => gm_core::EngineError::Codec(other.to_string()),
        }
    }
}

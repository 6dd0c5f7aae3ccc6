//! Driver error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("no driver loaded")]
    NotLoaded,

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("driver refused: {0}")]
    Refused(String),

    #[error("no such channel: {dir} {channel}")]
    NoSuchChannel { dir: &'static str, channel: usize },

    #[error("buffers not created")]
    NoBuffers,

    #[error("driver not running")]
    NotRunning,
}

pub type DriverResult<T> = Result<T, DriverError>;

impl From<DriverError> for gm_core::EngineError {
    fn from(err: DriverError) -> Self {
        gm_core::EngineError::Driver(err.to_string())
    }
}

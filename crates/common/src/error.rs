//! Common error types

use protocol::PlatformError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Platform worker dropped the request")]
    WorkerDropped,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

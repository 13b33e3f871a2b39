//! Error types shared across the device-control stack

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a platform backend may report
///
/// Backends never return anything else; the executor maps these onto the
/// caller-facing taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    /// Target device or drive is not present
    #[error("device not found: {0}")]
    NotFound(String),

    /// Resource is in use (safe eject only)
    #[error("device busy: {0}")]
    Busy(String),

    /// The platform or class does not implement this capability
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The platform API needed to service the request is not available
    #[error("platform unavailable: {0}")]
    Unavailable(String),

    /// The underlying OS call failed
    #[error("OS error: {0}")]
    Os(String),
}

impl From<std::io::Error> for PlatformError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => PlatformError::NotFound(e.to_string()),
            _ => PlatformError::Os(e.to_string()),
        }
    }
}

/// Error code carried in a failed response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Busy,
    Conflict,
    Unsupported,
    StateViolation,
    OsFailure,
    Timeout,
    InvalidRequest,
    Unknown,
}

impl ErrorCode {
    /// HTTP status code used when this error reaches the HTTP boundary
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::NotFound => 404,
            ErrorCode::Busy | ErrorCode::Conflict | ErrorCode::StateViolation => 409,
            ErrorCode::Unsupported => 501,
            ErrorCode::Timeout => 504,
            ErrorCode::InvalidRequest => 400,
            ErrorCode::OsFailure | ErrorCode::Unknown => 500,
        }
    }
}

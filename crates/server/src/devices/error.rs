//! Caller-facing operation errors

use protocol::{ErrorCode, OperationKind, PlatformError};
use thiserror::Error;

/// Why an enumeration query or a device command did not succeed
///
/// Every failure inside the device layer ends up as one of these before it
/// reaches the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} is busy; close open files or use force eject")]
    Busy(String),

    #[error("{running} already in progress on {target}, retry when it completes")]
    Conflict {
        target: String,
        running: OperationKind,
    },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("camera is already recording")]
    AlreadyRecording,

    #[error("camera is not recording")]
    NotRecording,

    #[error("OS call failed: {0}")]
    OsFailure(String),

    #[error("operation {id} on {target} is still running after {secs}s")]
    Timeout { id: u64, target: String, secs: u64 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Unknown(String),
}

impl OperationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            OperationError::NotFound(_) => ErrorCode::NotFound,
            OperationError::Busy(_) => ErrorCode::Busy,
            OperationError::Conflict { .. } => ErrorCode::Conflict,
            OperationError::Unsupported(_) => ErrorCode::Unsupported,
            OperationError::AlreadyRecording | OperationError::NotRecording => {
                ErrorCode::StateViolation
            }
            OperationError::OsFailure(_) => ErrorCode::OsFailure,
            OperationError::Timeout { .. } => ErrorCode::Timeout,
            OperationError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            OperationError::Unknown(_) => ErrorCode::Unknown,
        }
    }

    /// Finer-grained reason for state violations
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            OperationError::AlreadyRecording => Some("already_recording"),
            OperationError::NotRecording => Some("not_recording"),
            _ => None,
        }
    }
}

impl From<PlatformError> for OperationError {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::NotFound(what) => OperationError::NotFound(what),
            PlatformError::Busy(what) => OperationError::Busy(what),
            PlatformError::Unsupported(what) => OperationError::Unsupported(what),
            PlatformError::Unavailable(what) => {
                OperationError::Unsupported(format!("{} is not available on this host", what))
            }
            PlatformError::Os(msg) => OperationError::OsFailure(msg),
        }
    }
}

impl From<common::Error> for OperationError {
    fn from(e: common::Error) -> Self {
        match e {
            common::Error::Platform(platform) => platform.into(),
            other => OperationError::Unknown(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_violations_carry_reason() {
        assert_eq!(
            OperationError::AlreadyRecording.code(),
            ErrorCode::StateViolation
        );
        assert_eq!(
            OperationError::NotRecording.reason(),
            Some("not_recording")
        );
        assert_eq!(OperationError::OsFailure("x".into()).reason(), None);
    }

    #[test]
    fn test_platform_errors_map_onto_taxonomy() {
        let busy: OperationError = PlatformError::Busy("E".into()).into();
        assert_eq!(busy.code(), ErrorCode::Busy);

        let unavailable: OperationError = PlatformError::Unavailable("rfkill".into()).into();
        assert_eq!(unavailable.code(), ErrorCode::Unsupported);

        let dropped: OperationError = common::Error::WorkerDropped.into();
        assert_eq!(dropped.code(), ErrorCode::Unknown);
    }
}

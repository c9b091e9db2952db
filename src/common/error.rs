//! Error types for minidfs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Wire status for a successful response
pub const STATUS_OK: i32 = 0;

#[derive(Error, Debug)]
pub enum Error {
    // === Namespace Errors ===
    #[error("File/Directory not found: {0}")]
    NotFound(String),

    #[error("File/Directory already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    // === Placement Errors ===
    #[error("Insufficient replicas: need {needed}, have {available}")]
    InsufficientReplicas { needed: usize, available: usize },

    // === Node Registry Errors ===
    #[error("Invalid node id: {0}")]
    InvalidNodeId(String),

    // === Data Plane Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid range: offset {offset} + length {length} exceeds block size {size}")]
    InvalidRange { offset: u64, length: u64, size: u64 },

    // === Network Errors ===
    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// A failure reported by a remote peer whose status has no local variant
    #[error("Remote error ({status}): {message}")]
    Remote { status: i32, message: String },

    // === Config Errors ===
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // === Generic ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Is it worth trying the same request against another replica?
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::Protocol(_)
                | Error::InvalidConfig(_)
                | Error::InvalidNodeId(_)
                | Error::Config(_)
                | Error::InvalidRange { .. }
                // A range rejected by one replica is rejected by all of them
                | Error::Remote { status: -6, .. }
        )
    }

    /// Status code written at the head of an error response
    pub fn status_code(&self) -> i32 {
        match self {
            Error::NotFound(_) => -1,
            Error::AlreadyExists(_) => -2,
            Error::PermissionDenied(_) => -3,
            Error::Io(_) => -4,
            Error::InvalidPath(_) => -5,
            Error::InvalidRange { .. } => -6,
            Error::InsufficientReplicas { .. } => -7,
            Error::NodeUnreachable(_) | Error::Timeout(_) => -8,
            Error::InvalidNodeId(_) => -9,
            Error::Remote { status, .. } => *status,
            _ => -100,
        }
    }

    /// Rebuild an error from a response status and its message
    pub fn from_status(status: i32, message: String) -> Self {
        match status {
            -1 => Error::NotFound(message),
            -2 => Error::AlreadyExists(message),
            -3 => Error::PermissionDenied(message),
            -4 => Error::Io(std::io::Error::other(message)),
            -5 => Error::InvalidPath(message),
            -8 => Error::NodeUnreachable(message),
            -9 => Error::InvalidNodeId(message),
            _ => Error::Remote { status, message },
        }
    }

    /// Does this error close the connection without a structured reply?
    pub fn closes_connection(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Internal(format!("blocking task failed: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        let cases = vec![
            Error::NotFound("/a".into()),
            Error::AlreadyExists("/a".into()),
            Error::PermissionDenied("/a".into()),
            Error::InvalidPath("a".into()),
            Error::NodeUnreachable("n1".into()),
            Error::InvalidNodeId("dn,x".into()),
        ];
        for err in cases {
            let code = err.status_code();
            assert!(code < 0);
            let back = Error::from_status(code, err.to_string());
            assert_eq!(back.status_code(), code);
        }
    }

    #[test]
    fn test_protocol_closes_connection() {
        assert!(Error::Protocol("bad opcode".into()).closes_connection());
        assert!(!Error::NotFound("/x".into()).closes_connection());
        assert!(!Error::Protocol("x".into()).is_retryable());
        assert!(Error::NodeUnreachable("n".into()).is_retryable());
        assert!(!Error::from_status(-6, "range".into()).is_retryable());
        assert!(Error::from_status(-1, "block".into()).is_retryable());
    }

    #[test]
    fn test_unknown_status_is_remote() {
        let err = Error::from_status(-42, "boom".into());
        assert!(matches!(err, Error::Remote { status: -42, .. }));
    }
}

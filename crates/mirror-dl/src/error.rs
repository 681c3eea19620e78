//! Error taxonomy for transfers, request construction and the store boundary

use std::error::Error as StdError;

use thiserror::Error;

/// Failure of a single streaming transfer
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer cancelled")]
    Cancelled,
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    HttpStatus(reqwest::StatusCode),
    #[error("size mismatch: expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("{algorithm} digest mismatch: expected {expected}, computed {actual}")]
    DigestMismatch {
        algorithm: &'static str,
        expected: String,
        actual: String,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Cancelled)
    }
}

/// A request that cannot be built; fatal for that item, never reaches the network
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{path}: unknown digest algorithm '{algorithm}'")]
    UnknownAlgorithm { path: String, algorithm: String },
    #[error("{path}: undecodable digest: {source}")]
    InvalidDigest {
        path: String,
        #[source]
        source: hex::FromHexError,
    },
    #[error("{path}: digest is {actual} bytes, {algorithm} needs {expected}")]
    DigestLength {
        path: String,
        algorithm: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{path}: path escapes the install root")]
    UnsafePath { path: String },
    #[error("{url}: invalid source url: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Queue/store I/O failure, surfaced to the operator
#[derive(Debug, Error)]
#[error("storage failure: {0}")]
pub struct StorageError(#[source] pub Box<dyn StdError + Send + Sync>);

impl StorageError {
    pub fn new(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self(err.into())
    }
}

/// Lifecycle failure
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_detected_structurally() {
        assert!(TransferError::Cancelled.is_cancelled());
        let err = TransferError::SizeMismatch {
            expected: 10,
            actual: 9,
        };
        assert!(!err.is_cancelled());
    }

    #[test]
    fn storage_error_wraps_plain_messages() {
        let err = StorageError::new("disk full");
        assert_eq!(err.to_string(), "storage failure: disk full");
    }
}

//! Error types for debtor-replica

use thiserror::Error;

use crate::records::{ActionId, UserId};

/// Errors returned by the replica store public API
#[derive(Error, Debug)]
pub enum ReplicaError {
    #[error("Record does not exist: {0}")]
    NotFound(String),

    #[error("User already installed: userId={0}")]
    AlreadyInstalled(UserId),

    #[error("Action already resolved: actionId={0}")]
    AlreadyResolved(ActionId),

    #[error("Precondition violated: {0}")]
    Precondition(String),

    #[error("Invalid document: {0}")]
    InvalidDocument(#[from] DocumentError),

    #[error("Invalid payment request: {0}")]
    InvalidPaymentRequest(#[from] PaymentRequestError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Rejection reasons for coin-info documents
///
/// Schema violations carry the ajv-style instance path of the offending
/// field (empty for root-level problems), so a UI can point at it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Unknown content type: {0}")]
    UnknownContentType(String),

    #[error("Document is too big: {size} bytes (max {max})")]
    TooBig { size: usize, max: usize },

    #[error("Decoding error")]
    Encoding,

    #[error("Parse error")]
    Parse,

    #[error("{path} {message}")]
    Schema { path: String, message: String },
}

/// Rejection reasons for SPR0 payment requests
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentRequestError {
    #[error("Wrong content type: {0}")]
    WrongContentType(String),

    #[error("Parse error")]
    Malformed,

    #[error("CRC mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("Invalid amount")]
    AmountOverflow,

    #[error("Invalid deadline: {0}")]
    InvalidDeadline(String),

    #[error("Invalid description format: {0}")]
    UnsupportedDescriptionFormat(String),
}

//! Error types for the state engine.

use crate::types::BoxError;
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A step body returned an error.
    #[error("{source}")]
    StepFailed {
        step: String,
        #[source]
        source: BoxError,
    },

    #[error("Step '{step}' timed out after {timeout_ms}ms")]
    Timeout { step: String, timeout_ms: u64 },

    #[error("next() called multiple times")]
    NextCalledMultipleTimes,

    #[error("Middleware error: {0}")]
    Middleware(String),

    #[error("Transaction {transaction} failed and rolled back: {source}")]
    TransactionRolledBack {
        transaction: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Transaction {transaction} failed (rollback disabled): {source}")]
    TransactionFailed {
        transaction: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Compensation for step '{step}' failed: {source}")]
    CompensationFailed {
        step: String,
        #[source]
        source: BoxError,
    },

    /// A compensation failed while rolling back; remaining compensations were skipped.
    #[error("Transaction {transaction} rollback aborted ({cause}): {source}")]
    RollbackFailed {
        transaction: String,
        /// The failure that triggered the rollback.
        cause: Box<Error>,
        #[source]
        source: Box<Error>,
    },

    #[error("Transaction {transaction} rollback finished with {} failed compensation(s): {}", .failures.len(), .failures.join("; "))]
    CompensationsFailed {
        transaction: String,
        failures: Vec<String>,
    },

    #[error("Manual rollback of {transaction} requires auto-rollback to be disabled")]
    ManualRollbackUnavailable { transaction: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("State manager has been disposed")]
    Disposed,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },
}

impl Error {
    /// Name of the step this error originated from, if any.
    pub fn step(&self) -> Option<&str> {
        match self {
            Error::StepFailed { step, .. }
            | Error::Timeout { step, .. }
            | Error::CompensationFailed { step, .. } => Some(step),
            Error::TransactionRolledBack { source, .. }
            | Error::TransactionFailed { source, .. }
            | Error::RollbackFailed { source, .. } => source.step(),
            _ => None,
        }
    }

    /// Whether this error (or its wrapped cause) is a step timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::TransactionRolledBack { source, .. }
            | Error::TransactionFailed { source, .. } => source.is_timeout(),
            Error::RollbackFailed { cause, .. } => cause.is_timeout(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Deserialization(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

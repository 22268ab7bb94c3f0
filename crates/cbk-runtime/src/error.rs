//! Runtime error taxonomy.
//!
//! The split mirrors what the caller can do about it: `Validation` and
//! `Unauthorized` mean the request itself is wrong, `Precondition` means
//! the chain state does not admit it right now, `ExternalFetch` means an
//! upstream source failed and nothing was persisted, `Internal` is a bug
//! or infrastructure fault.

use cbk_decompose::DecomposeError;
use cbk_settle::{AmendError, WastageError};
use cbk_sources::SourceError;

use crate::store::StoreError;

#[derive(Debug)]
pub enum RuntimeError {
    /// Malformed input; rejected before any persistence.
    Validation(String),
    /// The actor is not allowed to perform this operation.
    Unauthorized(String),
    /// The referenced settlement does not exist.
    NotFound(String),
    /// Chain state forbids the operation (no bootstrap yet, guard window,
    /// tail moved under a concurrent writer).
    Precondition(String),
    /// An external source failed; the whole submission aborts.
    ExternalFetch(String),
    Internal(anyhow::Error),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Precondition(msg) => write!(f, "precondition failed: {msg}"),
            Self::ExternalFetch(msg) => write!(f, "external fetch failed: {msg}"),
            Self::Internal(e) => write!(f, "internal error: {e}"),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Internal(e) => e.source(),
            _ => None,
        }
    }
}

impl From<SourceError> for RuntimeError {
    fn from(e: SourceError) -> Self {
        RuntimeError::ExternalFetch(e.to_string())
    }
}

impl From<DecomposeError> for RuntimeError {
    fn from(e: DecomposeError) -> Self {
        RuntimeError::Validation(e.to_string())
    }
}

impl From<WastageError> for RuntimeError {
    fn from(e: WastageError) -> Self {
        RuntimeError::Validation(e.to_string())
    }
}

impl From<AmendError> for RuntimeError {
    fn from(e: AmendError) -> Self {
        RuntimeError::Validation(e.to_string())
    }
}

impl From<StoreError> for RuntimeError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ChainConflict { .. } => RuntimeError::Precondition(e.to_string()),
            StoreError::Backend(inner) => RuntimeError::Internal(inner),
        }
    }
}

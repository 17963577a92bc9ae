//! Memory-layer errors for conversation and idempotency persistence.
//!
//! ```rust
//! use gmemory::{MemoryError, MemoryErrorKind};
//!
//! let err = MemoryError::conflict("duplicate idempotency key");
//! assert_eq!(err.kind, MemoryErrorKind::Conflict);
//! assert_eq!(err.to_string(), "Conflict: duplicate idempotency key");
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryErrorKind {
    Storage,
    NotFound,
    InvalidRequest,
    Conflict,
    InvalidState,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct MemoryError {
    pub kind: MemoryErrorKind,
    pub message: String,
}

impl MemoryError {
    pub fn new(kind: MemoryErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(MemoryErrorKind::Storage, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(MemoryErrorKind::NotFound, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(MemoryErrorKind::InvalidRequest, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(MemoryErrorKind::Conflict, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(MemoryErrorKind::InvalidState, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(MemoryErrorKind::Other, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == MemoryErrorKind::NotFound
    }
}

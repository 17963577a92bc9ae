//! Shared provider error kinds and error value helpers.
//!
//! ```rust
//! use gprovider::{ProviderError, ProviderErrorKind};
//!
//! let missing = ProviderError::model_not_registered("m1");
//! assert_eq!(missing.kind, ProviderErrorKind::ModelNotRegistered);
//! assert!(!missing.retryable);
//!
//! let timeout = ProviderError::timeout("temporary timeout");
//! assert!(timeout.retryable);
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    InvalidRequest,
    ModelNotRegistered,
    Configuration,
    Timeout,
    Transport,
    Upstream,
    Cancelled,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::InvalidRequest, message, false)
    }

    pub fn model_not_registered(model_id: impl AsRef<str>) -> Self {
        Self::new(
            ProviderErrorKind::ModelNotRegistered,
            format!("model not registered: {}", model_id.as_ref()),
            false,
        )
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Configuration, message, false)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message, true)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transport, message, true)
    }

    /// Non-success upstream status on a call that is not proxied verbatim.
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::new(
            ProviderErrorKind::Upstream,
            format!("status={status} {}", message.into()),
            status >= 500,
        )
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Cancelled, message, false)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Other, message, false)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ProviderErrorKind::Cancelled
    }
}

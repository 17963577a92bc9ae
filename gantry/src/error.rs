use gmemory::MemoryError;
use gprovider::ProviderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    Configuration,
    Provider,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Configuration, message)
    }
}

impl From<ProviderError> for GatewayError {
    fn from(error: ProviderError) -> Self {
        Self::new(GatewayErrorKind::Provider, error.to_string())
    }
}

impl From<MemoryError> for GatewayError {
    fn from(error: MemoryError) -> Self {
        Self::new(GatewayErrorKind::Storage, error.to_string())
    }
}

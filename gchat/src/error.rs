//! Chat-layer errors and the client-facing error body.
//!
//! ```rust
//! use gchat::{ChatError, ChatErrorKind};
//!
//! let err = ChatError::model_required();
//! assert_eq!(err.kind, ChatErrorKind::ModelRequired);
//! assert_eq!(err.status_code(), 400);
//!
//! let body = err.to_response("req_1");
//! assert_eq!(body.code, "model_required");
//! assert_eq!(body.param.as_deref(), Some("model"));
//! ```

use gmemory::{MemoryError, MemoryErrorKind};
use gprovider::{ProviderError, ProviderErrorKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatErrorKind {
    InvalidJson,
    ModelRequired,
    MessagesRequired,
    Unauthorized,
    ModelNotFound,
    ConversationNotFound,
    CompletionFailed,
    Internal,
}

impl ChatErrorKind {
    pub fn status_code(self) -> u16 {
        match self {
            Self::InvalidJson | Self::ModelRequired | Self::MessagesRequired => 400,
            Self::Unauthorized => 401,
            Self::ModelNotFound | Self::ConversationNotFound => 404,
            Self::CompletionFailed | Self::Internal => 500,
        }
    }

    /// Stable machine-readable code sent to clients.
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::ModelRequired => "model_required",
            Self::MessagesRequired => "messages_required",
            Self::Unauthorized => "unauthorized",
            Self::ModelNotFound => "model_not_found",
            Self::ConversationNotFound => "conversation_not_found",
            Self::CompletionFailed => "completion_failed",
            Self::Internal => "internal_error",
        }
    }

    pub fn error_type(self) -> ErrorType {
        match self.status_code() {
            401 => ErrorType::AuthError,
            500.. => ErrorType::InternalError,
            _ => ErrorType::InvalidRequestError,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct ChatError {
    pub kind: ChatErrorKind,
    pub message: String,
}

impl ChatError {
    pub fn new(kind: ChatErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::InvalidJson, message)
    }

    pub fn model_required() -> Self {
        Self::new(ChatErrorKind::ModelRequired, "model is required")
    }

    pub fn messages_required() -> Self {
        Self::new(
            ChatErrorKind::MessagesRequired,
            "at least one message is required",
        )
    }

    pub fn unauthorized() -> Self {
        Self::new(ChatErrorKind::Unauthorized, "authenticated principal is required")
    }

    pub fn model_not_found(model: impl AsRef<str>) -> Self {
        Self::new(
            ChatErrorKind::ModelNotFound,
            format!("model not found: {}", model.as_ref()),
        )
    }

    pub fn conversation_not_found(conversation_id: impl AsRef<str>) -> Self {
        Self::new(
            ChatErrorKind::ConversationNotFound,
            format!("conversation not found: {}", conversation_id.as_ref()),
        )
    }

    pub fn completion_failed(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::CompletionFailed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ChatErrorKind::Internal, message)
    }

    pub fn status_code(&self) -> u16 {
        self.kind.status_code()
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    /// Request field the error points at, when there is one.
    pub fn param(&self) -> Option<&'static str> {
        match self.kind {
            ChatErrorKind::ModelRequired | ChatErrorKind::ModelNotFound => Some("model"),
            ChatErrorKind::MessagesRequired => Some("messages"),
            ChatErrorKind::ConversationNotFound => Some("conversation"),
            _ => None,
        }
    }

    pub fn to_response(&self, request_id: impl Into<String>) -> ErrorResponse {
        ErrorResponse {
            error_type: self.kind.error_type(),
            code: self.code().to_string(),
            message: self.message.clone(),
            param: self.param().map(str::to_string),
            request_id: request_id.into(),
        }
    }
}

impl From<ProviderError> for ChatError {
    fn from(value: ProviderError) -> Self {
        match value.kind {
            ProviderErrorKind::ModelNotRegistered => {
                Self::new(ChatErrorKind::ModelNotFound, value.message)
            }
            _ => Self::completion_failed(value.to_string()),
        }
    }
}

impl From<MemoryError> for ChatError {
    fn from(value: MemoryError) -> Self {
        match value.kind {
            MemoryErrorKind::NotFound => {
                Self::new(ChatErrorKind::ConversationNotFound, value.message)
            }
            _ => Self::internal(value.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    InvalidRequestError,
    AuthError,
    RateLimitError,
    InternalError,
}

/// Error body a transport writes for a failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    pub request_id: String,
}

#[cfg(test)]
mod tests {
    use gmemory::MemoryError;
    use gprovider::ProviderError;

    use super::{ChatError, ChatErrorKind, ErrorType};

    #[test]
    fn provider_errors_map_to_client_kinds() {
        let missing: ChatError = ProviderError::model_not_registered("m9").into();
        assert_eq!(missing.kind, ChatErrorKind::ModelNotFound);
        assert_eq!(missing.status_code(), 404);

        let transport: ChatError = ProviderError::transport("connection reset").into();
        assert_eq!(transport.kind, ChatErrorKind::CompletionFailed);
        assert_eq!(transport.code(), "completion_failed");
        assert_eq!(transport.status_code(), 500);
    }

    #[test]
    fn storage_failures_are_internal() {
        let err: ChatError = MemoryError::storage("disk full").into();
        assert_eq!(err.kind, ChatErrorKind::Internal);
        assert_eq!(err.code(), "internal_error");
    }

    #[test]
    fn error_response_serializes_type_field() {
        let body = ChatError::unauthorized().to_response("req_7");
        assert_eq!(body.error_type, ErrorType::AuthError);

        let json = serde_json::to_value(&body).expect("body should serialize");
        assert_eq!(json["type"], "auth_error");
        assert_eq!(json["code"], "unauthorized");
        assert_eq!(json["request_id"], "req_7");
        assert!(json.get("param").is_none());
    }
}

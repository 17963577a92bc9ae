//! Provider-shaped request, response, and model configuration types.
//!
//! ```rust
//! use gprovider::{ChatCompletionRequest, ProviderErrorKind, ProviderMessage};
//! use serde_json::json;
//!
//! let mut message = ProviderMessage::new();
//! message.insert("role".to_string(), json!("user"));
//! message.insert("content".to_string(), json!("hi"));
//!
//! let request = ChatCompletionRequest::builder("served-model")
//!     .message(message)
//!     .temperature(0.2)
//!     .build()
//!     .expect("request should validate");
//! let payload = serde_json::to_value(&request).expect("payload should serialize");
//!
//! assert_eq!(payload["model"], "served-model");
//! assert!(payload.get("top_p").is_none());
//!
//! let err = ChatCompletionRequest::builder("served-model").build().unwrap_err();
//! assert_eq!(err.kind, ProviderErrorKind::InvalidRequest);
//! ```

use bytes::Bytes;
use gcommon::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ProviderError;

/// One message in provider wire shape (`role`, `content`, `name`, `tool_calls`, ...).
pub type ProviderMessage = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub served_name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ModelConfig {
    pub fn new(id: impl Into<String>, served_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            served_name: served_name.into(),
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities(
        mut self,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

/// Payload sent upstream. Absent optional fields are omitted, never sent as null.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ProviderMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

const RESERVED_FIELDS: [&str; 7] = [
    "model",
    "messages",
    "stream",
    "temperature",
    "top_p",
    "max_tokens",
    "metadata",
];

impl ChatCompletionRequest {
    pub fn builder(model: impl Into<String>) -> ChatCompletionRequestBuilder {
        ChatCompletionRequestBuilder::new(model)
    }

    pub fn new(model: impl Into<String>, messages: Vec<ProviderMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
            temperature: None,
            top_p: None,
            max_tokens: None,
            metadata: None,
            extras: Map::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.model.trim().is_empty() {
            return Err(ProviderError::invalid_request("model must not be empty"));
        }

        if self.messages.is_empty() {
            return Err(ProviderError::invalid_request(
                "at least one message is required",
            ));
        }

        if let Some(key) = self
            .extras
            .keys()
            .find(|key| RESERVED_FIELDS.contains(&key.as_str()))
        {
            return Err(ProviderError::invalid_request(format!(
                "extra field '{key}' collides with a core request field"
            )));
        }

        Ok(())
    }

    pub fn to_payload(&self) -> Result<Bytes, ProviderError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|err| ProviderError::other(format!("marshal provider payload: {err}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletionRequestBuilder {
    request: ChatCompletionRequest,
}

impl ChatCompletionRequestBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            request: ChatCompletionRequest::new(model, Vec::new()),
        }
    }

    pub fn message(mut self, message: ProviderMessage) -> Self {
        self.request.messages.push(message);
        self
    }

    pub fn messages(mut self, messages: Vec<ProviderMessage>) -> Self {
        self.request.messages.extend(messages);
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.request.stream = stream;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.request.temperature = Some(temperature);
        self
    }

    pub fn top_p(mut self, top_p: f32) -> Self {
        self.request.top_p = Some(top_p);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.request.max_tokens = Some(max_tokens);
        self
    }

    pub fn metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.request.metadata = Some(metadata);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.request.extras.insert(key.into(), value);
        self
    }

    pub fn build(self) -> Result<ChatCompletionRequest, ProviderError> {
        self.request.validate()?;
        Ok(self.request)
    }
}

/// Verbatim upstream reply: the gateway never reinterprets status or body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CompletionResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteModel {
    pub id: String,
    pub display_name: String,
    pub family: String,
    pub capabilities: Vec<String>,
}

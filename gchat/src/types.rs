//! Client wire types for chat completion requests and orchestrator results.
//!
//! ```rust
//! use gchat::{ChatCompletionRequest, ConversationReference};
//!
//! let request = ChatCompletionRequest::from_slice(
//!     br#"{"model":"m1","messages":[{"role":"user","content":"hi"}],"conversation":{}}"#,
//! )
//! .expect("request should parse");
//!
//! assert_eq!(request.messages[0].text_content().as_deref(), Some("hi"));
//! assert_eq!(request.conversation, Some(ConversationReference::new_conversation()));
//! assert!(request.should_store());
//! ```

use std::fmt::{Debug, Formatter};
use std::pin::Pin;

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use gcommon::{HeaderMap, Principal};
use gprovider::ProviderMessage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::ChatError;

pub const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Conversation to attach a request to.
///
/// A bare string or `{"id": ...}` names an existing conversation; `{}` or an
/// empty id asks for a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConversationReference {
    Id(String),
    Object {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl ConversationReference {
    pub fn new_conversation() -> Self {
        Self::Object { id: None }
    }

    pub fn existing(id: impl Into<String>) -> Self {
        Self::Object {
            id: Some(id.into()),
        }
    }

    /// The referenced id, or `None` when a new conversation is requested.
    pub fn id(&self) -> Option<&str> {
        let id = match self {
            Self::Id(id) => Some(id.as_str()),
            Self::Object { id } => id.as_deref(),
        };
        id.map(str::trim).filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequence {
    Single(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputAudio {
    pub data: String,
    pub format: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    InputAudio { input_audio: InputAudio },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: MessageContent) -> Self {
        Self {
            role: role.into(),
            content: Some(content),
            ..Self::default()
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new("system", MessageContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new("user", MessageContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new("assistant", MessageContent::Text(text.into()))
    }

    pub fn tool(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new("tool", MessageContent::Text(text.into()))
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// String content, or the concatenated text parts of array content.
    pub fn text_content(&self) -> Option<String> {
        match self.content.as_ref()? {
            MessageContent::Text(text) => Some(text.clone()),
            MessageContent::Parts(parts) => {
                let text = parts
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("");
                Some(text)
            }
        }
    }

    /// Provider wire shape carrying only the fields that are present.
    pub fn to_provider_message(&self) -> Result<ProviderMessage, ChatError> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(ChatError::internal("chat message did not serialize to an object")),
            Err(err) => Err(ChatError::internal(format!("serialize chat message: {err}"))),
        }
    }
}

/// An OpenAI-style chat completion request as sent by clients.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_reasoning: Option<bool>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl ChatCompletionRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, ChatError> {
        serde_json::from_slice(body)
            .map_err(|err| ChatError::invalid_json(format!("invalid request body: {err}")))
    }

    pub fn with_message(mut self, message: ChatMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn with_conversation(mut self, conversation: ConversationReference) -> Self {
        self.conversation = Some(conversation);
        self
    }

    pub fn with_store(mut self, store: bool) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_store_reasoning(mut self, store_reasoning: bool) -> Self {
        self.store_reasoning = Some(store_reasoning);
        self
    }

    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        if self.model.trim().is_empty() {
            return Err(ChatError::model_required());
        }
        if self.messages.is_empty() {
            return Err(ChatError::messages_required());
        }
        Ok(())
    }

    pub fn should_store(&self) -> bool {
        self.store.unwrap_or(true)
    }

    pub fn should_store_reasoning(&self) -> bool {
        self.store_reasoning.unwrap_or(false)
    }
}

/// Per-request transport facts the orchestrator needs.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal: Option<Principal>,
    pub method: String,
    pub path: String,
    pub idempotency_key: Option<String>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            ..Self::anonymous()
        }
    }

    pub fn anonymous() -> Self {
        Self {
            principal: None,
            method: "POST".to_string(),
            path: CHAT_COMPLETIONS_PATH.to_string(),
            idempotency_key: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_route(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.method = method.into();
        self.path = path.into();
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub(crate) fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Conversation identity attached to a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Case-insensitive header lookup.
pub fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// A buffered (non-streaming) completion ready to write to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub conversation: Option<ConversationSummary>,
    pub replayed: bool,
}

impl ChatCompletion {
    pub fn content_type(&self) -> &str {
        header_value(&self.headers, "content-type").unwrap_or(JSON_CONTENT_TYPE)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<Value, ChatError> {
        serde_json::from_slice(&self.body)
            .map_err(|err| ChatError::internal(format!("response body is not json: {err}")))
    }
}

pub type ChatByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send + 'static>>;

/// A streamed completion. Status and headers are final before the first chunk.
pub struct ChatStream {
    pub status: u16,
    pub headers: HeaderMap,
    pub conversation: Option<ConversationSummary>,
    pub replayed: bool,
    body: ChatByteStream,
}

impl ChatStream {
    pub(crate) fn new(
        status: u16,
        headers: HeaderMap,
        conversation: Option<ConversationSummary>,
        body: ChatByteStream,
    ) -> Self {
        Self {
            status,
            headers,
            conversation,
            replayed: false,
            body,
        }
    }

    pub fn content_type(&self) -> &str {
        header_value(&self.headers, "content-type").unwrap_or(EVENT_STREAM_CONTENT_TYPE)
    }

    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, ChatError>> {
        self.body.next().await
    }

    pub fn into_body(self) -> ChatByteStream {
        self.body
    }

    /// Drains the stream into one buffer, stopping at the first error.
    pub async fn collect_bytes(mut self) -> Result<Bytes, ChatError> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await {
            buffer.extend_from_slice(&chunk?);
        }
        Ok(buffer.freeze())
    }
}

impl Debug for ChatStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatStream")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("conversation", &self.conversation)
            .field("replayed", &self.replayed)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum ChatResponse {
    Complete(ChatCompletion),
    Stream(ChatStream),
}

impl ChatResponse {
    pub fn status(&self) -> u16 {
        match self {
            Self::Complete(completion) => completion.status,
            Self::Stream(stream) => stream.status,
        }
    }

    pub fn conversation(&self) -> Option<&ConversationSummary> {
        match self {
            Self::Complete(completion) => completion.conversation.as_ref(),
            Self::Stream(stream) => stream.conversation.as_ref(),
        }
    }

    pub fn is_replay(&self) -> bool {
        match self {
            Self::Complete(completion) => completion.replayed,
            Self::Stream(stream) => stream.replayed,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        ChatCompletionRequest, ChatMessage, ContentPart, ConversationReference, MessageContent,
        RequestContext, StopSequence,
    };
    use crate::ChatErrorKind;

    #[test]
    fn conversation_reference_accepts_string_and_object_forms() {
        let by_string: ConversationReference =
            serde_json::from_value(json!("conv_abc")).expect("string form");
        assert_eq!(by_string.id(), Some("conv_abc"));

        let by_object: ConversationReference =
            serde_json::from_value(json!({"id": "conv_abc"})).expect("object form");
        assert_eq!(by_object.id(), Some("conv_abc"));

        let empty: ConversationReference =
            serde_json::from_value(json!({})).expect("empty object");
        assert_eq!(empty.id(), None);
        assert_eq!(ConversationReference::Id("  ".to_string()).id(), None);
    }

    #[test]
    fn malformed_body_is_invalid_json() {
        let err = ChatCompletionRequest::from_slice(b"{not json").expect_err("should fail");
        assert_eq!(err.kind, ChatErrorKind::InvalidJson);
    }

    #[test]
    fn validation_checks_model_before_messages() {
        let err = ChatCompletionRequest::default()
            .validate()
            .expect_err("empty request should fail");
        assert_eq!(err.kind, ChatErrorKind::ModelRequired);

        let err = ChatCompletionRequest::new("m1")
            .validate()
            .expect_err("missing messages should fail");
        assert_eq!(err.kind, ChatErrorKind::MessagesRequired);
    }

    #[test]
    fn provider_message_omits_absent_fields() {
        let message = ChatMessage::tool("call_1", "42").to_provider_message().expect("map");
        assert_eq!(message.len(), 3);
        assert_eq!(message["role"], "tool");
        assert_eq!(message["tool_call_id"], "call_1");
        assert!(!message.contains_key("name"));
    }

    #[test]
    fn mixed_content_parts_round_through_serde() {
        let request = ChatCompletionRequest::from_slice(
            br#"{
                "model": "m1",
                "stop": ["\n\n", "END"],
                "messages": [{
                    "role": "user",
                    "content": [
                        {"type": "text", "text": "what is "},
                        {"type": "image_url", "image_url": {"url": "https://img/1.png"}},
                        {"type": "text", "text": "this?"}
                    ]
                }]
            }"#,
        )
        .expect("request should parse");

        assert_eq!(
            request.stop,
            Some(StopSequence::Many(vec!["\n\n".to_string(), "END".to_string()]))
        );
        let Some(MessageContent::Parts(parts)) = &request.messages[0].content else {
            panic!("expected content parts");
        };
        assert!(matches!(parts[1], ContentPart::ImageUrl { .. }));
        assert_eq!(
            request.messages[0].text_content().as_deref(),
            Some("what is this?")
        );
    }

    #[test]
    fn blank_idempotency_key_is_ignored() {
        let context = RequestContext::anonymous().with_idempotency_key("   ");
        assert_eq!(context.idempotency_key(), None);
        assert_eq!(context.method, "POST");
        assert_eq!(context.path, "/v1/chat/completions");
    }
}

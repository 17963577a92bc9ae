//! Chat completion orchestration over routed providers and stored conversations.
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use gchat::{ChatCompletionRequest, ChatErrorKind, ChatMessage, ChatService, RequestContext};
//! use gcommon::Principal;
//! use gprovider::ProviderRegistry;
//!
//! let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
//! runtime.block_on(async {
//!     let service = ChatService::builder(Arc::new(ProviderRegistry::new())).build();
//!     let request = ChatCompletionRequest::new("missing-model").with_message(ChatMessage::user("hi"));
//!
//!     let err = service
//!         .complete(RequestContext::new(Principal::new("user-1")), request)
//!         .await
//!         .expect_err("unregistered model");
//!     assert_eq!(err.kind, ChatErrorKind::ModelNotFound);
//!     assert_eq!(err.status_code(), 404);
//! });
//! ```

mod error;
mod history;
mod hooks;
mod service;
mod sse;
mod types;

pub mod prelude {
    pub use crate::{
        ChatCompletion, ChatCompletionRequest, ChatError, ChatErrorKind, ChatHooks, ChatMessage,
        ChatResponse, ChatService, ChatServiceBuilder, ChatStream, ConversationReference,
        ConversationSummary, ErrorResponse, NoopChatHooks, RequestContext, StopSequence,
    };
}

pub use error::{ChatError, ChatErrorKind, ErrorResponse, ErrorType};
pub use history::{DEFAULT_CONVERSATION_TITLE, synthesize_title};
pub use hooks::{ChatHooks, NoopChatHooks};
pub use service::{ChatService, ChatServiceBuilder};
pub use types::{
    CHAT_COMPLETIONS_PATH, ChatByteStream, ChatCompletion, ChatCompletionRequest, ChatMessage,
    ChatResponse, ChatStream, ContentPart, ConversationReference, ConversationSummary,
    EVENT_STREAM_CONTENT_TYPE, ImageUrl, InputAudio, JSON_CONTENT_TYPE, MessageContent,
    RequestContext, StopSequence, header_value,
};

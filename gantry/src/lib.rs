//! Unified facade over the gantry workspace crates.
//!
//! This crate is the single dependency for most gateway deployments. It
//! re-exports the workspace crates and wires them together behind
//! [`Gateway`], built once from a [`GatewayConfig`] or from explicit parts.
//!
//! ```rust
//! use gantry::{ChatCompletionRequest, ChatErrorKind, ChatMessage, Gateway, Principal, RequestContext};
//!
//! let gateway = Gateway::builder().build().expect("gateway should build");
//!
//! let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
//! runtime.block_on(async {
//!     let request = ChatCompletionRequest::new("chat-small").with_message(ChatMessage::user("hi"));
//!     let err = gateway
//!         .chat()
//!         .handle(RequestContext::new(Principal::new("user-1")), request)
//!         .await
//!         .expect_err("no models are registered");
//!     assert_eq!(err.kind, ChatErrorKind::ModelNotFound);
//! });
//! ```

mod config;
mod error;
mod gateway;

pub mod prelude;

pub use gchat;
pub use gcommon;
pub use gmemory;
pub use gobserve;
pub use gprovider;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayErrorKind};
pub use gateway::{Gateway, GatewayBuilder, default_hooks};

pub use gchat::{
    ChatCompletion, ChatCompletionRequest, ChatError, ChatErrorKind, ChatHooks, ChatMessage,
    ChatResponse, ChatService, ChatServiceBuilder, ChatStream, ConversationReference,
    ConversationSummary, ErrorResponse, NoopChatHooks, RequestContext,
};
pub use gcommon::{AuthMethod, BoxFuture, HeaderMap, IdGenerator, Principal, PrincipalId};
pub use gmemory::{
    Conversation, ConversationRepository, IdempotencyStore, MemoryError, MemoryErrorKind, Storage,
    StorageConfig,
};
pub use gobserve::{
    FanoutChatHooks, MetricsObservabilityHooks, SafeChatHooks, TracingObservabilityHooks,
};
pub use gprovider::{
    ChatProvider, ModelConfig, ProviderCatalogConfig, ProviderError, ProviderErrorKind,
    ProviderRegistry, Route,
};

//! Common imports for most gantry deployments.

pub use crate::{
    ChatCompletion, ChatCompletionRequest, ChatError, ChatErrorKind, ChatHooks, ChatMessage,
    ChatProvider, ChatResponse, ChatService, ChatStream, ConversationReference,
    ConversationRepository, ConversationSummary, ErrorResponse, Gateway, GatewayBuilder,
    GatewayConfig, GatewayError, IdempotencyStore, ModelConfig, Principal, ProviderCatalogConfig,
    ProviderError, ProviderRegistry, RequestContext, StorageConfig,
};

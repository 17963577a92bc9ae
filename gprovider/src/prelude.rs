//! Common `gprovider` imports for downstream crates.

pub use crate::{
    ChatCompletionRequest, ChatProvider, CompletionResponse, ModelConfig, ProviderCatalogConfig,
    ProviderError, ProviderErrorKind, ProviderFuture, ProviderMessage, ProviderRegistry,
    ProviderStream, RemoteModel, Route,
};
pub use gcommon::{BoxFuture, HeaderMap};

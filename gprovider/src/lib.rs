//! Upstream provider adapters and model routing for the chat gateway.
//!
//! ```rust
//! use gprovider::{ModelConfig, ProviderRegistry};
//!
//! let registry = ProviderRegistry::new();
//! assert!(registry.resolve("chat-small").is_err());
//!
//! let model = ModelConfig::new("chat-small", "small-v1").with_capabilities(["chat"]);
//! assert_eq!(model.capabilities, vec!["chat".to_string()]);
//! ```

pub mod adapters;
pub mod catalog;
pub mod error;
pub mod model;
pub mod prelude;
pub mod provider;
pub mod registry;
pub mod stream;

pub use catalog::{ProviderCatalogConfig, ProviderEntryConfig, RoutingConfig};
#[cfg(feature = "provider-openai")]
pub use catalog::load_registry;
pub use error::{ProviderError, ProviderErrorKind};
pub use model::{
    ChatCompletionRequest, ChatCompletionRequestBuilder, CompletionResponse, ModelConfig,
    ProviderMessage, RemoteModel,
};
pub use provider::{ChatProvider, ProviderFuture};
pub use registry::{ProviderRegistry, Route};
pub use stream::{ChunkStream, ProviderStream, split_lines};

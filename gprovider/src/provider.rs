//! Provider trait contract for upstream chat-completion backends.

use std::future::Future;
use std::pin::Pin;

use gcommon::HeaderMap;

use crate::{
    ChatCompletionRequest, CompletionResponse, ModelConfig, ProviderError, ProviderStream,
    RemoteModel,
};

pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An upstream backend speaking the chat-completions protocol.
///
/// Non-2xx upstream statuses are returned as ordinary responses, not errors,
/// so callers can proxy them verbatim. Errors mean the call could not be made
/// or read at all.
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, _model: &ModelConfig) -> bool {
        true
    }

    fn chat_completions<'a>(
        &'a self,
        request: ChatCompletionRequest,
        headers: &'a HeaderMap,
    ) -> ProviderFuture<'a, Result<CompletionResponse, ProviderError>>;

    fn chat_completions_stream<'a>(
        &'a self,
        request: ChatCompletionRequest,
        headers: &'a HeaderMap,
    ) -> ProviderFuture<'a, Result<ProviderStream, ProviderError>>;

    fn list_models<'a>(&'a self) -> ProviderFuture<'a, Result<Vec<RemoteModel>, ProviderError>>;

    fn health_check<'a>(&'a self) -> ProviderFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move { self.list_models().await.map(|_| ()) })
    }
}

//! Provider and model routing registry.
//!
//! ```rust
//! use gprovider::{ProviderErrorKind, ProviderRegistry};
//!
//! let registry = ProviderRegistry::new();
//! assert!(registry.providers().is_empty());
//!
//! let err = registry.resolve("unknown").unwrap_err();
//! assert_eq!(err.kind, ProviderErrorKind::ModelNotRegistered);
//! ```

use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use gcommon::Registry;
use parking_lot::RwLock;

use crate::{ChatProvider, ModelConfig, ProviderError};

/// A resolved model: its configuration and the provider serving it.
#[derive(Clone)]
pub struct Route {
    pub model: ModelConfig,
    pub provider: Arc<dyn ChatProvider>,
}

impl Route {
    pub fn new(model: ModelConfig, provider: Arc<dyn ChatProvider>) -> Self {
        Self { model, provider }
    }
}

impl Debug for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("model", &self.model)
            .field("provider", &self.provider.name())
            .finish()
    }
}

#[derive(Default)]
struct Inner {
    providers: Registry<String, Arc<dyn ChatProvider>>,
    models: Registry<String, Route>,
    default_provider: Option<String>,
}

/// Thread-safe registry shared by every in-flight request.
///
/// Lookups take a read lock; registration takes a write lock. Re-registering
/// a model id replaces the previous route.
#[derive(Default)]
pub struct ProviderRegistry {
    inner: RwLock<Inner>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_provider(&self, provider: Arc<dyn ChatProvider>) {
        let name = provider.name().to_string();
        self.inner.write().providers.insert(name, provider);
    }

    pub fn register_model(&self, model: ModelConfig, provider: Arc<dyn ChatProvider>) {
        let id = model.id.clone();
        self.inner
            .write()
            .models
            .insert(id, Route::new(model, provider));
    }

    /// Registers `model` only if `provider` reports it can serve it.
    pub fn register_supported_model(
        &self,
        model: ModelConfig,
        provider: Arc<dyn ChatProvider>,
    ) -> Result<(), ProviderError> {
        if !provider.supports(&model) {
            return Err(ProviderError::configuration(format!(
                "provider '{}' does not support model '{}'",
                provider.name(),
                model.id
            )));
        }
        self.register_model(model, provider);
        Ok(())
    }

    pub fn set_default_provider(&self, name: impl Into<String>) {
        self.inner.write().default_provider = Some(name.into());
    }

    pub fn default_provider(&self) -> Option<String> {
        self.inner.read().default_provider.clone()
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn ChatProvider>> {
        self.inner.read().providers.get(name).cloned()
    }

    pub fn resolve(&self, model_id: &str) -> Result<Route, ProviderError> {
        self.inner
            .read()
            .models
            .get(model_id)
            .cloned()
            .ok_or_else(|| ProviderError::model_not_registered(model_id))
    }

    /// Snapshot of registered providers, sorted by name.
    pub fn providers(&self) -> Vec<Arc<dyn ChatProvider>> {
        let mut providers = self
            .inner
            .read()
            .providers
            .values()
            .cloned()
            .collect::<Vec<_>>();
        providers.sort_by(|left, right| left.name().cmp(right.name()));
        providers
    }

    /// Snapshot of registered routes, sorted by model id.
    pub fn models(&self) -> Vec<Route> {
        let mut models = self
            .inner
            .read()
            .models
            .values()
            .cloned()
            .collect::<Vec<_>>();
        models.sort_by(|left, right| left.model.id.cmp(&right.model.id));
        models
    }

    /// Probes every provider. Failures are logged, never returned.
    ///
    /// Returns the names of providers that failed their probe.
    pub async fn health_check_all(&self) -> Vec<String> {
        let mut unhealthy = Vec::new();

        for provider in self.providers() {
            if let Err(err) = provider.health_check().await {
                tracing::warn!(
                    provider = provider.name(),
                    error = %err,
                    "provider health check failed"
                );
                unhealthy.push(provider.name().to_string());
            }
        }

        unhealthy
    }
}

impl Debug for ProviderRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ProviderRegistry")
            .field("providers", &inner.providers.len())
            .field("models", &inner.models.len())
            .field("default_provider", &inner.default_provider)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use bytes::Bytes;
    use gcommon::HeaderMap;

    use super::ProviderRegistry;
    use crate::{
        ChatCompletionRequest, ChatProvider, CompletionResponse, ModelConfig, ProviderError,
        ProviderErrorKind, ProviderFuture, ProviderStream, RemoteModel,
    };

    struct StaticProvider {
        name: &'static str,
        healthy: bool,
        required_capability: Option<&'static str>,
    }

    impl ChatProvider for StaticProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn supports(&self, model: &ModelConfig) -> bool {
            self.required_capability
                .is_none_or(|capability| model.capabilities.iter().any(|c| c == capability))
        }

        fn chat_completions<'a>(
            &'a self,
            _request: ChatCompletionRequest,
            _headers: &'a HeaderMap,
        ) -> ProviderFuture<'a, Result<CompletionResponse, ProviderError>> {
            Box::pin(async move {
                Ok(CompletionResponse::new(
                    200,
                    HeaderMap::new(),
                    Bytes::from(self.name),
                ))
            })
        }

        fn chat_completions_stream<'a>(
            &'a self,
            _request: ChatCompletionRequest,
            _headers: &'a HeaderMap,
        ) -> ProviderFuture<'a, Result<ProviderStream, ProviderError>> {
            Box::pin(async { Ok(ProviderStream::from_chunks(200, HeaderMap::new(), Vec::new())) })
        }

        fn list_models<'a>(
            &'a self,
        ) -> ProviderFuture<'a, Result<Vec<RemoteModel>, ProviderError>> {
            Box::pin(async move {
                if self.healthy {
                    Ok(Vec::new())
                } else {
                    Err(ProviderError::transport("connection refused"))
                }
            })
        }
    }

    fn provider(name: &'static str, healthy: bool) -> Arc<dyn ChatProvider> {
        Arc::new(StaticProvider {
            name,
            healthy,
            required_capability: None,
        })
    }

    #[test]
    fn supported_models_register_and_unsupported_are_rejected() {
        let registry = ProviderRegistry::new();
        let chat_only: Arc<dyn ChatProvider> = Arc::new(StaticProvider {
            name: "chat-only",
            healthy: true,
            required_capability: Some("chat"),
        });

        registry
            .register_supported_model(
                ModelConfig::new("m1", "served-m1").with_capabilities(["chat"]),
                Arc::clone(&chat_only),
            )
            .expect("chat model is supported");
        let err = registry
            .register_supported_model(
                ModelConfig::new("embed", "embed-v1").with_capabilities(["embeddings"]),
                chat_only,
            )
            .expect_err("embedding model is not supported");

        assert_eq!(err.kind, ProviderErrorKind::Configuration);
        assert!(registry.resolve("m1").is_ok());
        assert!(registry.resolve("embed").is_err());
    }

    #[test]
    fn resolve_returns_registered_route() {
        let registry = ProviderRegistry::new();
        let upstream = provider("p1", true);
        registry.register_provider(upstream.clone());
        registry.register_model(ModelConfig::new("m1", "served-m1"), upstream);

        let route = registry.resolve("m1").expect("route should resolve");
        assert_eq!(route.model.served_name, "served-m1");
        assert_eq!(route.provider.name(), "p1");
    }

    #[test]
    fn resolve_unknown_model_fails() {
        let registry = ProviderRegistry::new();
        let err = registry.resolve("missing").expect_err("must fail");

        assert_eq!(err.kind, ProviderErrorKind::ModelNotRegistered);
        assert!(err.message.contains("missing"));
    }

    #[test]
    fn register_model_replaces_previous_route() {
        let registry = ProviderRegistry::new();
        registry.register_model(ModelConfig::new("m1", "old"), provider("p1", true));
        registry.register_model(ModelConfig::new("m1", "new"), provider("p2", true));

        let route = registry.resolve("m1").expect("route should resolve");
        assert_eq!(route.model.served_name, "new");
        assert_eq!(route.provider.name(), "p2");
        assert_eq!(registry.models().len(), 1);
    }

    #[test]
    fn snapshots_are_sorted_and_default_provider_is_recorded() {
        let registry = ProviderRegistry::new();
        registry.register_provider(provider("zeta", true));
        registry.register_provider(provider("alpha", true));
        registry.set_default_provider("alpha");

        let names = registry
            .providers()
            .iter()
            .map(|provider| provider.name().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
        assert_eq!(registry.default_provider().as_deref(), Some("alpha"));
        assert!(registry.provider("zeta").is_some());
        assert!(registry.provider("nope").is_none());
    }

    #[tokio::test]
    async fn health_check_all_reports_without_failing() {
        let registry = ProviderRegistry::new();
        registry.register_provider(provider("up", true));
        registry.register_provider(provider("down", false));

        let unhealthy = registry.health_check_all().await;
        assert_eq!(unhealthy, vec!["down".to_string()]);
    }

    #[test]
    fn concurrent_resolution_sees_registered_models() {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register_model(ModelConfig::new("m1", "served"), provider("p1", true));

        let handles = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.resolve("m1").map(|route| route.model.id))
            })
            .collect::<Vec<_>>();

        for handle in handles {
            let resolved = handle.join().expect("thread should finish");
            assert_eq!(resolved.expect("route"), "m1");
        }
    }
}

//! Composition root wiring providers, storage, and the chat service.

use std::sync::Arc;

use gchat::{ChatHooks, ChatService};
use gcommon::{IdGenerator, SecureIdGenerator};
use gmemory::{ConversationRepository, IdempotencyStore, Storage, StorageConfig, create_storage};
use gobserve::{FanoutChatHooks, MetricsObservabilityHooks, TracingObservabilityHooks};
use gprovider::{ProviderCatalogConfig, ProviderRegistry};

#[cfg(feature = "provider-openai")]
use gprovider::adapters::openai::{OpenAiHttpTransport, OpenAiTransport};

use crate::{GatewayConfig, GatewayError};

/// Tracing and metrics hooks, each isolated from the other's panics.
pub fn default_hooks() -> Arc<dyn ChatHooks> {
    Arc::new(
        FanoutChatHooks::new()
            .with(Arc::new(TracingObservabilityHooks))
            .with(Arc::new(MetricsObservabilityHooks)),
    )
}

pub struct GatewayBuilder {
    catalog: Option<ProviderCatalogConfig>,
    registry: Option<Arc<ProviderRegistry>>,
    storage_config: StorageConfig,
    storage: Option<Storage>,
    #[cfg(feature = "provider-openai")]
    transport: Option<Arc<dyn OpenAiTransport>>,
    ids: Arc<dyn IdGenerator>,
    hooks: Arc<dyn ChatHooks>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    /// Starts from an empty registry and in-memory storage.
    pub fn new() -> Self {
        Self {
            catalog: None,
            registry: None,
            storage_config: StorageConfig::InMemory,
            storage: None,
            #[cfg(feature = "provider-openai")]
            transport: None,
            ids: Arc::new(SecureIdGenerator),
            hooks: default_hooks(),
        }
    }

    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.catalog = Some(config.providers);
        self.storage_config = config.storage;
        self
    }

    /// Uses a prepared registry instead of loading one from the catalog.
    pub fn registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn storage_config(mut self, storage_config: StorageConfig) -> Self {
        self.storage_config = storage_config;
        self
    }

    /// Uses already opened repositories instead of the storage config.
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Transport shared by every catalog provider. Defaults to reqwest.
    #[cfg(feature = "provider-openai")]
    pub fn transport(mut self, transport: Arc<dyn OpenAiTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    #[cfg(feature = "provider-openai")]
    pub fn http_client(self, client: reqwest::Client) -> Self {
        self.transport(Arc::new(OpenAiHttpTransport::from_client(client)))
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn ChatHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    #[cfg(feature = "provider-openai")]
    fn load_catalog(&self, catalog: &ProviderCatalogConfig) -> Result<ProviderRegistry, GatewayError> {
        let transport: Arc<dyn OpenAiTransport> = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(OpenAiHttpTransport::new()?),
        };
        Ok(gprovider::load_registry(catalog, transport)?)
    }

    #[cfg(not(feature = "provider-openai"))]
    fn load_catalog(&self, catalog: &ProviderCatalogConfig) -> Result<ProviderRegistry, GatewayError> {
        catalog.validate()?;
        Err(GatewayError::configuration(
            "provider catalogs require the provider-openai feature",
        ))
    }

    pub fn build(self) -> Result<Gateway, GatewayError> {
        let registry = match (&self.registry, &self.catalog) {
            (Some(registry), _) => Arc::clone(registry),
            (None, Some(catalog)) => Arc::new(self.load_catalog(catalog)?),
            (None, None) => Arc::new(ProviderRegistry::new()),
        };

        let storage = match self.storage {
            Some(storage) => storage,
            None => create_storage(self.storage_config)?,
        };

        let chat = ChatService::builder(Arc::clone(&registry))
            .conversations(Arc::clone(&storage.conversations))
            .idempotency(Arc::clone(&storage.idempotency))
            .id_generator(self.ids)
            .hooks(self.hooks)
            .build();

        let default_provider = registry.default_provider().unwrap_or_default();
        tracing::info!(
            providers = registry.providers().len(),
            models = registry.models().len(),
            default_provider = default_provider.as_str(),
            "gateway ready"
        );

        Ok(Gateway {
            registry,
            storage,
            chat,
        })
    }
}

/// Owns everything a chat request needs. Cloning shares the same state.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<ProviderRegistry>,
    storage: Storage,
    chat: ChatService,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub fn from_config(config: GatewayConfig) -> Result<Self, GatewayError> {
        GatewayBuilder::new().config(config).build()
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn chat(&self) -> &ChatService {
        &self.chat
    }

    pub fn conversations(&self) -> &Arc<dyn ConversationRepository> {
        &self.storage.conversations
    }

    pub fn idempotency(&self) -> &Arc<dyn IdempotencyStore> {
        &self.storage.idempotency
    }

    /// Probes every provider and returns the names that failed. Boot never
    /// fails on an unhealthy provider.
    pub async fn health_check(&self) -> Vec<String> {
        self.registry.health_check_all().await
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

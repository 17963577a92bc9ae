//! Declarative provider catalog and registry bootstrap.
//!
//! ```rust
//! use gprovider::ProviderCatalogConfig;
//!
//! let config = ProviderCatalogConfig::from_yaml_str(
//!     r#"
//! providers:
//!   - name: local
//!     kind: openai
//!     base_url: http://127.0.0.1:8000
//!     models:
//!       - id: chat-small
//!         served_name: small-v1
//! routing:
//!   default_provider: local
//! "#,
//! )
//! .expect("catalog should parse");
//!
//! assert_eq!(config.providers[0].models[0].served_name, "small-v1");
//! assert_eq!(config.routing.default_provider.as_deref(), Some("local"));
//! ```

use std::path::Path;

use gcommon::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::{ModelConfig, ProviderError};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProviderCatalogConfig {
    #[serde(default)]
    pub providers: Vec<ProviderEntryConfig>,
    #[serde(default)]
    pub routing: RoutingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEntryConfig {
    pub name: String,
    pub kind: String,
    pub base_url: String,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub default_provider: Option<String>,
}

impl ProviderCatalogConfig {
    pub fn from_yaml_str(source: &str) -> Result<Self, ProviderError> {
        serde_yaml::from_str(source)
            .map_err(|err| ProviderError::configuration(format!("parse provider catalog: {err}")))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| {
            ProviderError::configuration(format!("read provider catalog {}: {err}", path.display()))
        })?;
        Self::from_yaml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.providers.is_empty() {
            return Err(ProviderError::configuration(
                "provider catalog must declare at least one provider",
            ));
        }

        for provider in &self.providers {
            if provider.name.trim().is_empty() {
                return Err(ProviderError::configuration("provider name must not be empty"));
            }
            for model in &provider.models {
                if model.id.trim().is_empty() || model.served_name.trim().is_empty() {
                    return Err(ProviderError::configuration(format!(
                        "provider '{}' has a model missing id or served_name",
                        provider.name
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(feature = "provider-openai")]
mod bootstrap {
    use std::sync::Arc;

    use super::ProviderCatalogConfig;
    use crate::adapters::openai::{OpenAiProvider, OpenAiTransport, PROVIDER_KIND};
    use crate::{ChatProvider, ProviderError, ProviderRegistry};

    /// Builds a registry from a catalog, wiring every provider to `transport`.
    pub fn load_registry(
        config: &ProviderCatalogConfig,
        transport: Arc<dyn OpenAiTransport>,
    ) -> Result<ProviderRegistry, ProviderError> {
        config.validate()?;
        let registry = ProviderRegistry::new();

        for entry in &config.providers {
            if entry.kind != PROVIDER_KIND {
                return Err(ProviderError::configuration(format!(
                    "provider '{}' has unsupported kind '{}'",
                    entry.name, entry.kind
                )));
            }

            let provider: Arc<dyn ChatProvider> = Arc::new(
                OpenAiProvider::new(&entry.name, &entry.base_url, Arc::clone(&transport))?
                    .with_headers(entry.headers.clone()),
            );
            registry.register_provider(Arc::clone(&provider));

            for model in &entry.models {
                registry.register_supported_model(model.clone(), Arc::clone(&provider))?;
            }
        }

        if let Some(default_provider) = &config.routing.default_provider {
            if registry.provider(default_provider).is_none() {
                tracing::warn!(
                    provider = default_provider.as_str(),
                    "default provider is not declared in the catalog"
                );
            }
            registry.set_default_provider(default_provider.clone());
        }

        Ok(registry)
    }
}

#[cfg(feature = "provider-openai")]
pub use bootstrap::load_registry;

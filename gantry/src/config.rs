//! YAML gateway configuration: the provider catalog plus the storage backend.
//!
//! ```rust
//! use gantry::{GatewayConfig, StorageConfig};
//!
//! let config = GatewayConfig::from_yaml_str(
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
//! storage:
//!   backend: in_memory
//! "#,
//! )
//! .expect("config should parse");
//!
//! assert_eq!(config.providers.providers.len(), 1);
//! assert_eq!(config.storage, StorageConfig::InMemory);
//! ```

use std::path::Path;

use gmemory::StorageConfig;
use gprovider::ProviderCatalogConfig;
use serde::{Deserialize, Serialize};

use crate::GatewayError;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(flatten)]
    pub providers: ProviderCatalogConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl GatewayConfig {
    pub fn new(providers: ProviderCatalogConfig) -> Self {
        Self {
            providers,
            storage: StorageConfig::default(),
        }
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }

    pub fn from_yaml_str(source: &str) -> Result<Self, GatewayError> {
        serde_yaml::from_str(source)
            .map_err(|err| GatewayError::configuration(format!("parse gateway config: {err}")))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|err| {
            GatewayError::configuration(format!("read gateway config {}: {err}", path.display()))
        })?;
        Self::from_yaml_str(&source)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use gmemory::StorageConfig;

    use super::GatewayConfig;
    use crate::GatewayErrorKind;

    #[test]
    fn storage_defaults_to_sqlite_when_omitted() {
        let config = GatewayConfig::from_yaml_str(
            "providers:\n  - name: p\n    kind: openai\n    base_url: http://localhost\n",
        )
        .expect("config should parse");

        assert!(matches!(config.storage, StorageConfig::Sqlite { .. }));
        assert_eq!(config.providers.providers[0].name, "p");
        assert!(config.providers.routing.default_provider.is_none());
    }

    #[test]
    fn sqlite_path_is_read_from_yaml() {
        let config = GatewayConfig::from_yaml_str(
            "providers: []\nstorage:\n  backend: sqlite\n  path: /var/lib/gantry/chat.sqlite3\n",
        )
        .expect("config should parse");

        assert_eq!(
            config.storage,
            StorageConfig::Sqlite {
                path: "/var/lib/gantry/chat.sqlite3".into()
            }
        );
    }

    #[test]
    fn malformed_yaml_is_a_configuration_error() {
        let err = GatewayConfig::from_yaml_str("providers: {").expect_err("invalid yaml");
        assert_eq!(err.kind, GatewayErrorKind::Configuration);
    }

    #[test]
    fn config_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "providers:\n  - name: p\n    kind: openai\n    base_url: http://localhost\nstorage:\n  backend: in_memory"
        )
        .expect("write config");

        let config = GatewayConfig::from_yaml_file(file.path()).expect("config should load");
        assert_eq!(config.storage, StorageConfig::InMemory);

        let err = GatewayConfig::from_yaml_file("/definitely/not/here.yaml")
            .expect_err("missing file");
        assert_eq!(err.kind, GatewayErrorKind::Configuration);
    }
}

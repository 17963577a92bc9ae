//! Storage backend selection.
//!
//! ```rust
//! use gmemory::{StorageConfig, create_storage};
//!
//! let storage = create_storage(StorageConfig::InMemory).expect("in-memory storage");
//! let _conversations = storage.conversations.clone();
//! let _idempotency = storage.idempotency.clone();
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backends::memory::{InMemoryConversationRepository, InMemoryIdempotencyStore};
use crate::backends::sqlite::{
    SqliteConversationRepository, SqliteIdempotencyStore, default_sqlite_path,
};
use crate::{ConversationRepository, IdempotencyStore, MemoryError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    Sqlite {
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,
    },
    InMemory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: default_sqlite_path(),
        }
    }
}

/// The repositories a gateway needs, sharing one backend choice.
#[derive(Clone)]
pub struct Storage {
    pub conversations: Arc<dyn ConversationRepository>,
    pub idempotency: Arc<dyn IdempotencyStore>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

pub fn create_storage(config: StorageConfig) -> Result<Storage, MemoryError> {
    match config {
        StorageConfig::Sqlite { path } => {
            tracing::debug!(path = %path.display(), "opening sqlite storage");
            Ok(Storage {
                conversations: Arc::new(SqliteConversationRepository::new(&path)?),
                idempotency: Arc::new(SqliteIdempotencyStore::new(&path)?),
            })
        }
        StorageConfig::InMemory => Ok(Storage {
            conversations: Arc::new(InMemoryConversationRepository::new()),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
        }),
    }
}

pub fn create_default_storage() -> Result<Storage, MemoryError> {
    create_storage(StorageConfig::default())
}

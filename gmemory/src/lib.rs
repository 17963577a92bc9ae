//! Conversation, branch, and idempotency persistence for the chat gateway.
//!
//! ```rust
//! use gmemory::{
//!     Content, Conversation, ConversationRepository, InMemoryConversationRepository, Item,
//!     ItemRole, MAIN_BRANCH,
//! };
//!
//! let runtime = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
//! runtime.block_on(async {
//!     let repo = InMemoryConversationRepository::new();
//!     let conversation = Conversation::new("conv_1", "user-1", None);
//!     repo.create(&conversation).await.expect("create");
//!
//!     let stored = repo
//!         .append_items(
//!             "conv_1",
//!             MAIN_BRANCH,
//!             vec![Item::message("msg_1", ItemRole::User, vec![Content::text("hi")])],
//!         )
//!         .await
//!         .expect("append");
//!     assert_eq!(stored[0].sequence_number, 0);
//! });
//! ```

mod backends;
mod conversation;
mod error;
mod item;
mod repository;
mod storage;

pub mod prelude {
    pub use crate::{
        BranchMetadata, Content, ContentType, Conversation, ConversationRepository,
        ConversationStatus, ForkRequest, IdempotencyKey, IdempotencyRecord, IdempotencyStore,
        InMemoryConversationRepository, InMemoryIdempotencyStore, Item, ItemRating, ItemRole,
        ItemStatus, ItemType, MAIN_BRANCH, MemoryError, MemoryErrorKind, Pagination,
        SqliteConversationRepository, SqliteIdempotencyStore, Storage, StorageConfig,
        create_default_storage, create_storage,
    };
}

pub use backends::memory::{InMemoryConversationRepository, InMemoryIdempotencyStore};
pub use backends::sqlite::{SqliteConversationRepository, SqliteIdempotencyStore};
pub use conversation::{BranchMetadata, Conversation, ConversationStatus, MAIN_BRANCH};
pub use error::{MemoryError, MemoryErrorKind};
pub use item::{
    Content, ContentType, IncompleteDetails, IncompleteReason, Item, ItemRating, ItemRole,
    ItemStatus, ItemType,
};
pub use repository::{
    ConversationRepository, DEFAULT_PAGE_LIMIT, ForkRequest, IdempotencyKey, IdempotencyRecord,
    IdempotencyStore, MAX_PAGE_LIMIT, Pagination,
};
pub use storage::{Storage, StorageConfig, create_default_storage, create_storage};

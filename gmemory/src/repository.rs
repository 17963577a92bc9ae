//! Repository contracts consumed by the chat orchestrator.

use chrono::{DateTime, Utc};
use gcommon::{BoxFuture, PrincipalId};
use serde::{Deserialize, Serialize};

use crate::{BranchMetadata, Conversation, Item, ItemRating, MemoryError};

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Cursor pagination. `after` is the public id of the last row already seen.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub after: Option<String>,
}

impl Pagination {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            after: None,
        }
    }

    pub fn after(mut self, cursor: impl Into<String>) -> Self {
        self.after = Some(cursor.into());
        self
    }

    /// Requested limit clamped to `1..=100`, defaulting to 20.
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .clamp(1, MAX_PAGE_LIMIT)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkRequest {
    pub source_branch: String,
    pub new_branch: String,
    pub from_item_id: Option<String>,
    pub description: Option<String>,
}

impl ForkRequest {
    pub fn new(source_branch: impl Into<String>, new_branch: impl Into<String>) -> Self {
        Self {
            source_branch: source_branch.into(),
            new_branch: new_branch.into(),
            from_item_id: None,
            description: None,
        }
    }

    pub fn from_item(mut self, item_id: impl Into<String>) -> Self {
        self.from_item_id = Some(item_id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Persistence for conversations, their branches, and items.
///
/// Lookups return `Ok(None)` when nothing matches; `Err` is reserved for
/// storage failures and rejected mutations.
pub trait ConversationRepository: Send + Sync {
    fn create<'a>(&'a self, conversation: &'a Conversation)
    -> BoxFuture<'a, Result<(), MemoryError>>;

    fn find_by_public_id<'a>(
        &'a self,
        public_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Conversation>, MemoryError>>;

    /// Writes title, status, metadata, active branch, and `updated_at`.
    fn update<'a>(&'a self, conversation: &'a Conversation)
    -> BoxFuture<'a, Result<(), MemoryError>>;

    /// Marks the conversation deleted; rows are retained.
    fn delete<'a>(&'a self, public_id: &'a str) -> BoxFuture<'a, Result<(), MemoryError>>;

    /// Newest first.
    fn list_by_owner<'a>(
        &'a self,
        owner: &'a PrincipalId,
        page: Pagination,
    ) -> BoxFuture<'a, Result<Vec<Conversation>, MemoryError>>;

    /// Appends items to `branch`, assigning contiguous sequence numbers
    /// atomically, and returns the stored items.
    fn append_items<'a>(
        &'a self,
        conversation_id: &'a str,
        branch: &'a str,
        items: Vec<Item>,
    ) -> BoxFuture<'a, Result<Vec<Item>, MemoryError>>;

    fn list_items<'a>(
        &'a self,
        conversation_id: &'a str,
        branch: &'a str,
        page: Pagination,
    ) -> BoxFuture<'a, Result<Vec<Item>, MemoryError>>;

    /// Case-insensitive substring search across every branch.
    fn search_items<'a>(
        &'a self,
        conversation_id: &'a str,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Item>, MemoryError>>;

    fn count_items<'a>(
        &'a self,
        conversation_id: &'a str,
        branch: &'a str,
    ) -> BoxFuture<'a, Result<usize, MemoryError>>;

    /// Prefers the copy on the active branch when forks share an item id.
    fn get_item<'a>(
        &'a self,
        conversation_id: &'a str,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Item>, MemoryError>>;

    fn create_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        metadata: BranchMetadata,
    ) -> BoxFuture<'a, Result<(), MemoryError>>;

    fn get_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<BranchMetadata>, MemoryError>>;

    fn list_branches<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<BranchMetadata>, MemoryError>>;

    /// Rejects `MAIN` and the active branch.
    fn delete_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), MemoryError>>;

    fn set_active_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), MemoryError>>;

    fn fork_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        request: ForkRequest,
    ) -> BoxFuture<'a, Result<BranchMetadata, MemoryError>>;

    fn rate_item<'a>(
        &'a self,
        conversation_id: &'a str,
        item_id: &'a str,
        rating: ItemRating,
        comment: Option<String>,
    ) -> BoxFuture<'a, Result<(), MemoryError>>;

    fn get_item_rating<'a>(
        &'a self,
        conversation_id: &'a str,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<ItemRating>, MemoryError>>;

    fn remove_item_rating<'a>(
        &'a self,
        conversation_id: &'a str,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<(), MemoryError>>;
}

/// Scope of one idempotent request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub principal_id: PrincipalId,
    pub method: String,
    pub path: String,
    pub key: String,
}

impl IdempotencyKey {
    pub fn new(
        principal_id: impl Into<PrincipalId>,
        method: impl Into<String>,
        path: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            principal_id: principal_id.into(),
            method: method.into(),
            path: path.into(),
            key: key.into(),
        }
    }
}

/// A captured response, written once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(key: IdempotencyKey, status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            key,
            status,
            content_type: None,
            body: body.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

pub trait IdempotencyStore: Send + Sync {
    /// `Ok(None)` on a miss.
    fn get<'a>(
        &'a self,
        key: &'a IdempotencyKey,
    ) -> BoxFuture<'a, Result<Option<IdempotencyRecord>, MemoryError>>;

    /// Fails with `Conflict` when a record for the same key already exists.
    fn save<'a>(&'a self, record: IdempotencyRecord) -> BoxFuture<'a, Result<(), MemoryError>>;
}

#[cfg(test)]
mod tests {
    use super::Pagination;

    #[test]
    fn pagination_limit_is_clamped() {
        assert_eq!(Pagination::default().effective_limit(), 20);
        assert_eq!(Pagination::new(0).effective_limit(), 1);
        assert_eq!(Pagination::new(500).effective_limit(), 100);
        assert_eq!(Pagination::new(7).after("msg_1").after.as_deref(), Some("msg_1"));
    }
}

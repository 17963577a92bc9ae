//! Mutex-guarded in-memory repositories.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use gcommon::{BoxFuture, PrincipalId};

use crate::repository::{
    ConversationRepository, ForkRequest, IdempotencyKey, IdempotencyRecord, IdempotencyStore,
    Pagination,
};
use crate::{BranchMetadata, Conversation, ConversationStatus, Item, ItemRating, MemoryError};

#[derive(Debug, Default)]
pub struct InMemoryConversationRepository {
    conversations: Mutex<HashMap<String, Conversation>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Conversation>>, MemoryError> {
        self.conversations
            .lock()
            .map_err(|_| MemoryError::storage("conversation repository lock poisoned"))
    }

    /// Runs `f` against a stored conversation under the repository lock.
    fn with_conversation<T>(
        &self,
        public_id: &str,
        f: impl FnOnce(&mut Conversation) -> Result<T, MemoryError>,
    ) -> Result<T, MemoryError> {
        let mut conversations = self.lock()?;
        let conversation = conversations.get_mut(public_id).ok_or_else(|| {
            MemoryError::not_found(format!("conversation not found: {public_id}"))
        })?;
        f(conversation)
    }
}

fn page_after<T>(rows: Vec<T>, page: &Pagination, id_of: impl Fn(&T) -> &str) -> Vec<T> {
    let start = match page.after.as_deref() {
        Some(cursor) => match rows.iter().position(|row| id_of(row) == cursor) {
            Some(index) => index + 1,
            None => return Vec::new(),
        },
        None => 0,
    };

    rows.into_iter()
        .skip(start)
        .take(page.effective_limit())
        .collect()
}

impl ConversationRepository for InMemoryConversationRepository {
    fn create<'a>(
        &'a self,
        conversation: &'a Conversation,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            let mut conversations = self.lock()?;
            if conversations.contains_key(conversation.public_id()) {
                return Err(MemoryError::conflict(format!(
                    "conversation already exists: {}",
                    conversation.public_id()
                )));
            }
            conversations.insert(conversation.public_id().to_string(), conversation.clone());
            Ok(())
        })
    }

    fn find_by_public_id<'a>(
        &'a self,
        public_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Conversation>, MemoryError>> {
        Box::pin(async move { Ok(self.lock()?.get(public_id).cloned()) })
    }

    fn update<'a>(
        &'a self,
        conversation: &'a Conversation,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation.public_id(), |stored| {
                stored.apply_header(conversation)
            })
        })
    }

    fn delete<'a>(&'a self, public_id: &'a str) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move { self.with_conversation(public_id, Conversation::mark_deleted) })
    }

    fn list_by_owner<'a>(
        &'a self,
        owner: &'a PrincipalId,
        page: Pagination,
    ) -> BoxFuture<'a, Result<Vec<Conversation>, MemoryError>> {
        Box::pin(async move {
            let mut owned = self
                .lock()?
                .values()
                .filter(|conversation| {
                    conversation.is_owned_by(owner)
                        && conversation.status() != ConversationStatus::Deleted
                })
                .cloned()
                .collect::<Vec<_>>();
            owned.sort_by(|left, right| {
                right
                    .created_at
                    .cmp(&left.created_at)
                    .then_with(|| right.public_id().cmp(left.public_id()))
            });

            Ok(page_after(owned, &page, |conversation| conversation.public_id()))
        })
    }

    fn append_items<'a>(
        &'a self,
        conversation_id: &'a str,
        branch: &'a str,
        items: Vec<Item>,
    ) -> BoxFuture<'a, Result<Vec<Item>, MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation_id, |conversation| {
                items
                    .into_iter()
                    .map(|item| conversation.add_item_to_branch(branch, item).cloned())
                    .collect()
            })
        })
    }

    fn list_items<'a>(
        &'a self,
        conversation_id: &'a str,
        branch: &'a str,
        page: Pagination,
    ) -> BoxFuture<'a, Result<Vec<Item>, MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation_id, |conversation| {
                if conversation.branch(branch).is_none() {
                    return Err(MemoryError::not_found(format!("branch not found: {branch}")));
                }
                let items = conversation.branch_items(branch).to_vec();
                Ok(page_after(items, &page, |item| item.public_id.as_str()))
            })
        })
    }

    fn search_items<'a>(
        &'a self,
        conversation_id: &'a str,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Item>, MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation_id, |conversation| {
                let names = conversation
                    .branches()
                    .map(|meta| meta.name.clone())
                    .collect::<Vec<_>>();
                Ok(names
                    .iter()
                    .flat_map(|name| conversation.branch_items(name))
                    .filter(|item| item.matches_query(query))
                    .cloned()
                    .collect())
            })
        })
    }

    fn count_items<'a>(
        &'a self,
        conversation_id: &'a str,
        branch: &'a str,
    ) -> BoxFuture<'a, Result<usize, MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation_id, |conversation| {
                conversation
                    .branch(branch)
                    .map(|meta| meta.item_count)
                    .ok_or_else(|| MemoryError::not_found(format!("branch not found: {branch}")))
            })
        })
    }

    fn get_item<'a>(
        &'a self,
        conversation_id: &'a str,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Item>, MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation_id, |conversation| {
                Ok(conversation.find_item(item_id).cloned())
            })
        })
    }

    fn create_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        metadata: BranchMetadata,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation_id, |conversation| {
                conversation.add_branch(metadata)
            })
        })
    }

    fn get_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<BranchMetadata>, MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation_id, |conversation| {
                Ok(conversation.branch(name).cloned())
            })
        })
    }

    fn list_branches<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<BranchMetadata>, MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation_id, |conversation| {
                Ok(conversation.branches().cloned().collect())
            })
        })
    }

    fn delete_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation_id, |conversation| {
                conversation.delete_branch(name)
            })
        })
    }

    fn set_active_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation_id, |conversation| {
                conversation.switch_branch(name)
            })
        })
    }

    fn fork_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        request: ForkRequest,
    ) -> BoxFuture<'a, Result<BranchMetadata, MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation_id, |conversation| {
                conversation
                    .create_branch(
                        &request.new_branch,
                        &request.source_branch,
                        request.from_item_id.as_deref(),
                        request.description.clone(),
                    )
                    .cloned()
            })
        })
    }

    fn rate_item<'a>(
        &'a self,
        conversation_id: &'a str,
        item_id: &'a str,
        rating: ItemRating,
        comment: Option<String>,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation_id, |conversation| {
                conversation.rate_item(item_id, rating, comment).map(|_| ())
            })
        })
    }

    fn get_item_rating<'a>(
        &'a self,
        conversation_id: &'a str,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<ItemRating>, MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation_id, |conversation| {
                conversation
                    .find_item(item_id)
                    .map(|item| item.rating)
                    .ok_or_else(|| MemoryError::not_found(format!("item not found: {item_id}")))
            })
        })
    }

    fn remove_item_rating<'a>(
        &'a self,
        conversation_id: &'a str,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            self.with_conversation(conversation_id, |conversation| {
                conversation.remove_item_rating(item_id)
            })
        })
    }
}

#[derive(Debug, Default)]
pub struct InMemoryIdempotencyStore {
    records: Mutex<HashMap<IdempotencyKey, IdempotencyRecord>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotencyStore for InMemoryIdempotencyStore {
    fn get<'a>(
        &'a self,
        key: &'a IdempotencyKey,
    ) -> BoxFuture<'a, Result<Option<IdempotencyRecord>, MemoryError>> {
        Box::pin(async move {
            let records = self
                .records
                .lock()
                .map_err(|_| MemoryError::storage("idempotency store lock poisoned"))?;
            Ok(records.get(key).cloned())
        })
    }

    fn save<'a>(&'a self, record: IdempotencyRecord) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            let mut records = self
                .records
                .lock()
                .map_err(|_| MemoryError::storage("idempotency store lock poisoned"))?;
            if records.contains_key(&record.key) {
                return Err(MemoryError::conflict(format!(
                    "idempotency key already recorded: {}",
                    record.key.key
                )));
            }
            records.insert(record.key.clone(), record);
            Ok(())
        })
    }
}

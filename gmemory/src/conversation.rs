//! Branch-structured conversation aggregate.
//!
//! ```rust
//! use gmemory::{Content, Conversation, Item, ItemRole, MAIN_BRANCH};
//!
//! let mut conversation = Conversation::new("conv_1", "user-1", None);
//! conversation.add_item_to_active_branch(Item::message(
//!     "msg_1",
//!     ItemRole::User,
//!     vec![Content::text("hi")],
//! ));
//!
//! conversation
//!     .create_branch("alt", MAIN_BRANCH, Some("msg_1"), None)
//!     .expect("fork should succeed");
//! conversation.switch_branch("alt").expect("branch exists");
//!
//! assert_eq!(conversation.active_branch(), "alt");
//! assert_eq!(conversation.active_branch_items().len(), 1);
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use gcommon::{MetadataMap, PrincipalId};
use serde::{Deserialize, Serialize};

use crate::{Item, ItemRating, MemoryError};

pub const MAIN_BRANCH: &str = "MAIN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Active,
    Archived,
    Deleted,
}

impl ConversationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forked_from_item_id: Option<String>,
    pub item_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BranchMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            description: None,
            parent_branch: None,
            forked_at: None,
            forked_from_item_id: None,
            item_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }
}

/// A conversation owning its branches and their items.
///
/// `MAIN` exists from creation and the active branch always names a branch
/// with metadata. Branch item lists are owned copies, never shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(rename = "id")]
    public_id: String,
    owner: PrincipalId,
    pub title: Option<String>,
    status: ConversationStatus,
    branches: BTreeMap<String, Vec<Item>>,
    branch_metadata: BTreeMap<String, BranchMetadata>,
    active_branch: String,
    pub metadata: MetadataMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(
        public_id: impl Into<String>,
        owner: impl Into<PrincipalId>,
        title: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let mut branch_metadata = BTreeMap::new();
        branch_metadata.insert(MAIN_BRANCH.to_string(), BranchMetadata::new(MAIN_BRANCH));
        let mut branches = BTreeMap::new();
        branches.insert(MAIN_BRANCH.to_string(), Vec::new());

        Self {
            public_id: public_id.into(),
            owner: owner.into(),
            title,
            status: ConversationStatus::Active,
            branches,
            branch_metadata,
            active_branch: MAIN_BRANCH.to_string(),
            metadata: MetadataMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    /// Rebuilds an aggregate read back from storage.
    ///
    /// Missing `MAIN` metadata is reseeded and a dangling active branch falls
    /// back to `MAIN`, so the invariants hold for any stored shape.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        public_id: String,
        owner: PrincipalId,
        title: Option<String>,
        status: ConversationStatus,
        branches: BTreeMap<String, Vec<Item>>,
        branch_metadata: BTreeMap<String, BranchMetadata>,
        active_branch: String,
        metadata: MetadataMap,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let mut conversation = Self {
            public_id,
            owner,
            title,
            status,
            branches,
            branch_metadata,
            active_branch,
            metadata,
            created_at,
            updated_at,
        };

        conversation
            .branch_metadata
            .entry(MAIN_BRANCH.to_string())
            .or_insert_with(|| BranchMetadata::new(MAIN_BRANCH));
        let names = conversation
            .branch_metadata
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        for name in names {
            conversation.branches.entry(name).or_default();
        }
        if !conversation
            .branch_metadata
            .contains_key(&conversation.active_branch)
        {
            conversation.active_branch = MAIN_BRANCH.to_string();
        }

        conversation
    }

    pub fn public_id(&self) -> &str {
        &self.public_id
    }

    pub fn owner(&self) -> &PrincipalId {
        &self.owner
    }

    pub fn is_owned_by(&self, principal: &PrincipalId) -> bool {
        &self.owner == principal
    }

    pub fn status(&self) -> ConversationStatus {
        self.status
    }

    pub fn active_branch(&self) -> &str {
        &self.active_branch
    }

    pub fn branch(&self, name: &str) -> Option<&BranchMetadata> {
        self.branch_metadata.get(name)
    }

    pub fn branches(&self) -> impl Iterator<Item = &BranchMetadata> {
        self.branch_metadata.values()
    }

    pub fn branch_items(&self, name: &str) -> &[Item] {
        self.branches.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn active_branch_items(&self) -> &[Item] {
        self.branch_items(&self.active_branch)
    }

    /// Finds an item, preferring the copy on the active branch.
    pub fn find_item(&self, item_id: &str) -> Option<&Item> {
        self.locate_item(item_id)
            .and_then(|(branch, index)| self.branches.get(&branch)?.get(index))
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = Some(title.into());
        self.touch();
    }

    pub fn add_item_to_active_branch(&mut self, item: Item) -> &Item {
        let branch = self.active_branch.clone();
        self.push_item(&branch, item)
    }

    pub fn add_item_to_branch(&mut self, branch: &str, item: Item) -> Result<&Item, MemoryError> {
        if !self.branch_metadata.contains_key(branch) {
            return Err(MemoryError::not_found(format!("branch not found: {branch}")));
        }
        Ok(self.push_item(branch, item))
    }

    fn push_item(&mut self, branch: &str, mut item: Item) -> &Item {
        let now = Utc::now();
        let items = self.branches.entry(branch.to_string()).or_default();
        item.conversation_id = self.public_id.clone();
        item.branch = branch.to_string();
        item.sequence_number = items.len();
        items.push(item);
        let count = items.len();

        if let Some(meta) = self.branch_metadata.get_mut(branch) {
            meta.item_count = count;
            meta.updated_at = now;
        }
        self.updated_at = now;

        let index = count - 1;
        &self.branches[branch][index]
    }

    pub fn switch_branch(&mut self, name: &str) -> Result<(), MemoryError> {
        if !self.branch_metadata.contains_key(name) {
            return Err(MemoryError::not_found(format!("branch not found: {name}")));
        }
        self.active_branch = name.to_string();
        self.touch();
        Ok(())
    }

    /// Forks `source` into `new_name`, copying items up to and including
    /// `from_item_id`. Without a fork item the new branch starts empty.
    pub fn create_branch(
        &mut self,
        new_name: &str,
        source: &str,
        from_item_id: Option<&str>,
        description: Option<String>,
    ) -> Result<&BranchMetadata, MemoryError> {
        if new_name.trim().is_empty() {
            return Err(MemoryError::invalid_request("branch name must not be empty"));
        }
        if self.branch_metadata.contains_key(new_name) {
            return Err(MemoryError::conflict(format!(
                "branch already exists: {new_name}"
            )));
        }
        if !self.branch_metadata.contains_key(source) {
            return Err(MemoryError::not_found(format!("branch not found: {source}")));
        }

        let from_item_id = from_item_id.filter(|id| !id.is_empty());
        let source_items = self.branch_items(source);
        let copied = match from_item_id {
            Some(item_id) => {
                let fork_index = source_items
                    .iter()
                    .position(|item| item.public_id == item_id)
                    .ok_or_else(|| MemoryError::not_found(format!("item not found: {item_id}")))?;
                fork_copy(&source_items[..=fork_index], new_name)
            }
            None => Vec::new(),
        };

        let now = Utc::now();
        let metadata = BranchMetadata {
            name: new_name.to_string(),
            description,
            parent_branch: Some(source.to_string()),
            forked_at: Some(now),
            forked_from_item_id: from_item_id.map(str::to_string),
            item_count: copied.len(),
            created_at: now,
            updated_at: now,
        };

        self.branches.insert(new_name.to_string(), copied);
        self.branch_metadata.insert(new_name.to_string(), metadata);
        self.touch();

        self.branch_metadata
            .get(new_name)
            .ok_or_else(|| MemoryError::storage(format!("branch vanished: {new_name}")))
    }

    /// Registers an empty branch described by `metadata`.
    pub fn add_branch(&mut self, mut metadata: BranchMetadata) -> Result<(), MemoryError> {
        if metadata.name.trim().is_empty() {
            return Err(MemoryError::invalid_request("branch name must not be empty"));
        }
        if self.branch_metadata.contains_key(&metadata.name) {
            return Err(MemoryError::conflict(format!(
                "branch already exists: {}",
                metadata.name
            )));
        }
        metadata.item_count = 0;
        self.branches.insert(metadata.name.clone(), Vec::new());
        self.branch_metadata.insert(metadata.name.clone(), metadata);
        self.touch();
        Ok(())
    }

    pub fn delete_branch(&mut self, name: &str) -> Result<(), MemoryError> {
        if name == MAIN_BRANCH {
            return Err(MemoryError::invalid_request("the MAIN branch cannot be deleted"));
        }
        if name == self.active_branch {
            return Err(MemoryError::invalid_state(format!(
                "branch {name} is active; switch branches before deleting it"
            )));
        }
        if self.branch_metadata.remove(name).is_none() {
            return Err(MemoryError::not_found(format!("branch not found: {name}")));
        }
        self.branches.remove(name);
        self.touch();
        Ok(())
    }

    pub fn rate_item(
        &mut self,
        item_id: &str,
        rating: ItemRating,
        comment: Option<String>,
    ) -> Result<&Item, MemoryError> {
        let item = self.item_mut(item_id)?;
        item.apply_rating(rating, comment);
        self.updated_at = Utc::now();
        self.find_item(item_id)
            .ok_or_else(|| MemoryError::not_found(format!("item not found: {item_id}")))
    }

    pub fn remove_item_rating(&mut self, item_id: &str) -> Result<(), MemoryError> {
        self.item_mut(item_id)?.clear_rating();
        self.touch();
        Ok(())
    }

    pub fn archive(&mut self) -> Result<(), MemoryError> {
        self.transition(ConversationStatus::Archived)
    }

    pub fn mark_deleted(&mut self) -> Result<(), MemoryError> {
        self.transition(ConversationStatus::Deleted)
    }

    fn transition(&mut self, next: ConversationStatus) -> Result<(), MemoryError> {
        if self.status != ConversationStatus::Active {
            return Err(MemoryError::invalid_state(format!(
                "conversation {} is {} and cannot become {}",
                self.public_id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        self.status = next;
        self.touch();
        Ok(())
    }

    /// Copies the mutable header fields of `other` onto this aggregate.
    ///
    /// Branches and items are untouched; an unknown active branch is rejected.
    pub(crate) fn apply_header(&mut self, other: &Conversation) -> Result<(), MemoryError> {
        if !self.branch_metadata.contains_key(&other.active_branch) {
            return Err(MemoryError::not_found(format!(
                "branch not found: {}",
                other.active_branch
            )));
        }
        self.title = other.title.clone();
        self.status = other.status;
        self.metadata = other.metadata.clone();
        self.active_branch = other.active_branch.clone();
        self.updated_at = other.updated_at;
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn locate_item(&self, item_id: &str) -> Option<(String, usize)> {
        let active = std::iter::once(self.active_branch.as_str());
        let others = self
            .branches
            .keys()
            .map(String::as_str)
            .filter(|name| *name != self.active_branch);

        active.chain(others).find_map(|branch| {
            self.branch_items(branch)
                .iter()
                .position(|item| item.public_id == item_id)
                .map(|index| (branch.to_string(), index))
        })
    }

    fn item_mut(&mut self, item_id: &str) -> Result<&mut Item, MemoryError> {
        let (branch, index) = self
            .locate_item(item_id)
            .ok_or_else(|| MemoryError::not_found(format!("item not found: {item_id}")))?;
        self.branches
            .get_mut(&branch)
            .and_then(|items| items.get_mut(index))
            .ok_or_else(|| MemoryError::not_found(format!("item not found: {item_id}")))
    }
}

/// Independent copies of `items` re-tagged for `branch` and renumbered from 0.
fn fork_copy(items: &[Item], branch: &str) -> Vec<Item> {
    items
        .iter()
        .enumerate()
        .map(|(sequence, item)| {
            let mut copy = item.clone();
            copy.branch = branch.to_string();
            copy.sequence_number = sequence;
            copy
        })
        .collect()
}

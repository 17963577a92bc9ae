use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use gcommon::{BoxFuture, MetadataMap, PrincipalId};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use crate::repository::{
    ConversationRepository, ForkRequest, IdempotencyKey, IdempotencyRecord, IdempotencyStore,
    Pagination,
};
use crate::{
    BranchMetadata, Content, Conversation, ConversationStatus, IncompleteDetails, Item, ItemRating,
    ItemRole, ItemStatus, ItemType, MAIN_BRANCH, MemoryError,
};

const SCHEMA: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;

    CREATE TABLE IF NOT EXISTS conversations (
        public_id TEXT PRIMARY KEY,
        owner TEXT NOT NULL,
        title TEXT,
        status TEXT NOT NULL,
        active_branch TEXT NOT NULL,
        metadata_json TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_conversations_owner_created
    ON conversations(owner, created_at, public_id);

    CREATE TABLE IF NOT EXISTS branches (
        conversation_id TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT,
        parent_branch TEXT,
        forked_at TEXT,
        forked_from_item_id TEXT,
        item_count INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (conversation_id, name)
    );

    CREATE TABLE IF NOT EXISTS items (
        conversation_id TEXT NOT NULL,
        branch TEXT NOT NULL,
        sequence_number INTEGER NOT NULL,
        public_id TEXT NOT NULL,
        item_type TEXT NOT NULL,
        role TEXT,
        content_json TEXT NOT NULL,
        status TEXT,
        incomplete_at TEXT,
        incomplete_details_json TEXT,
        completed_at TEXT,
        response_id TEXT,
        rating TEXT,
        rated_at TEXT,
        rating_comment TEXT,
        created_at TEXT NOT NULL,
        PRIMARY KEY (conversation_id, branch, sequence_number)
    );

    CREATE INDEX IF NOT EXISTS idx_items_public_id
    ON items(conversation_id, public_id);

    CREATE TABLE IF NOT EXISTS idempotency_records (
        principal_id TEXT NOT NULL,
        method TEXT NOT NULL,
        path TEXT NOT NULL,
        idempotency_key TEXT NOT NULL,
        status INTEGER NOT NULL,
        content_type TEXT,
        body BLOB NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (principal_id, method, path, idempotency_key)
    );
";

const ITEM_COLUMNS: &str = "
    public_id, conversation_id, branch, sequence_number, item_type, role, content_json, status,
    incomplete_at, incomplete_details_json, completed_at, response_id, rating, rated_at,
    rating_comment, created_at
";

const BRANCH_COLUMNS: &str = "
    name, description, parent_branch, forked_at, forked_from_item_id, item_count, created_at,
    updated_at
";

fn open_connection(path: Option<&Path>) -> Result<Connection, MemoryError> {
    let connection = match path {
        Some(path) => {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).map_err(|error| {
                    MemoryError::storage(format!(
                        "failed to create sqlite parent directory: {error}"
                    ))
                })?;
            }
            Connection::open(path).map_err(|error| {
                MemoryError::storage(format!("failed to open sqlite database: {error}"))
            })?
        }
        None => Connection::open_in_memory().map_err(|error| {
            MemoryError::storage(format!("failed to open in-memory sqlite database: {error}"))
        })?,
    };

    connection
        .busy_timeout(Duration::from_secs(5))
        .map_err(|error| {
            MemoryError::storage(format!("failed to configure sqlite busy timeout: {error}"))
        })?;
    connection.execute_batch(SCHEMA).map_err(|error| {
        MemoryError::storage(format!("failed to initialize sqlite schema: {error}"))
    })?;

    Ok(connection)
}

fn sql_error(action: &'static str) -> impl Fn(rusqlite::Error) -> MemoryError {
    move |error| MemoryError::storage(format!("failed to {action}: {error}"))
}

fn lock_connection<'a>(
    connection: &'a Mutex<Connection>,
) -> Result<MutexGuard<'a, Connection>, MemoryError> {
    connection
        .lock()
        .map_err(|_| MemoryError::storage("sqlite backend lock poisoned"))
}

/// SQLite-backed conversation repository.
///
/// Appends and forks take the write lock up front (`BEGIN IMMEDIATE`), so
/// sequence numbers stay contiguous under concurrent writers sharing the
/// same database file.
#[derive(Debug)]
pub struct SqliteConversationRepository {
    connection: Mutex<Connection>,
}

impl SqliteConversationRepository {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        Ok(Self {
            connection: Mutex::new(open_connection(Some(path.as_ref()))?),
        })
    }

    pub fn new_in_memory() -> Result<Self, MemoryError> {
        Ok(Self {
            connection: Mutex::new(open_connection(None)?),
        })
    }

    fn connection(&self) -> Result<MutexGuard<'_, Connection>, MemoryError> {
        lock_connection(&self.connection)
    }
}

struct HeaderRow {
    owner: String,
    title: Option<String>,
    status: String,
    active_branch: String,
    metadata_json: String,
    created_at: String,
    updated_at: String,
}

impl HeaderRow {
    fn status(&self) -> Result<ConversationStatus, MemoryError> {
        ConversationStatus::parse(&self.status).ok_or_else(|| {
            MemoryError::storage(format!("unknown conversation status '{}'", self.status))
        })
    }
}

struct ItemRow {
    public_id: String,
    conversation_id: String,
    branch: String,
    sequence_number: i64,
    item_type: String,
    role: Option<String>,
    content_json: String,
    status: Option<String>,
    incomplete_at: Option<String>,
    incomplete_details_json: Option<String>,
    completed_at: Option<String>,
    response_id: Option<String>,
    rating: Option<String>,
    rated_at: Option<String>,
    rating_comment: Option<String>,
    created_at: String,
}

impl ItemRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            public_id: row.get(0)?,
            conversation_id: row.get(1)?,
            branch: row.get(2)?,
            sequence_number: row.get(3)?,
            item_type: row.get(4)?,
            role: row.get(5)?,
            content_json: row.get(6)?,
            status: row.get(7)?,
            incomplete_at: row.get(8)?,
            incomplete_details_json: row.get(9)?,
            completed_at: row.get(10)?,
            response_id: row.get(11)?,
            rating: row.get(12)?,
            rated_at: row.get(13)?,
            rating_comment: row.get(14)?,
            created_at: row.get(15)?,
        })
    }

    fn into_item(self) -> Result<Item, MemoryError> {
        let item_type = ItemType::parse(&self.item_type).ok_or_else(|| {
            MemoryError::storage(format!("unknown item type '{}'", self.item_type))
        })?;
        let content: Vec<Content> = serde_json::from_str(&self.content_json).map_err(|error| {
            MemoryError::storage(format!("failed to decode item content JSON: {error}"))
        })?;
        let incomplete_details = self
            .incomplete_details_json
            .as_deref()
            .map(serde_json::from_str::<IncompleteDetails>)
            .transpose()
            .map_err(|error| {
                MemoryError::storage(format!("failed to decode incomplete details JSON: {error}"))
            })?;

        Ok(Item {
            public_id: self.public_id,
            conversation_id: self.conversation_id,
            branch: self.branch,
            sequence_number: decode_count(self.sequence_number)?,
            item_type,
            role: decode_wire(self.role.as_deref(), ItemRole::parse, "item role")?,
            content,
            status: decode_wire(self.status.as_deref(), ItemStatus::parse, "item status")?,
            incomplete_at: decode_optional_time(self.incomplete_at.as_deref())?,
            incomplete_details,
            completed_at: decode_optional_time(self.completed_at.as_deref())?,
            response_id: self.response_id,
            rating: decode_wire(self.rating.as_deref(), ItemRating::parse, "item rating")?,
            rated_at: decode_optional_time(self.rated_at.as_deref())?,
            rating_comment: self.rating_comment,
            created_at: decode_time(&self.created_at)?,
        })
    }
}

struct BranchRow {
    name: String,
    description: Option<String>,
    parent_branch: Option<String>,
    forked_at: Option<String>,
    forked_from_item_id: Option<String>,
    item_count: i64,
    created_at: String,
    updated_at: String,
}

impl BranchRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            description: row.get(1)?,
            parent_branch: row.get(2)?,
            forked_at: row.get(3)?,
            forked_from_item_id: row.get(4)?,
            item_count: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_metadata(self) -> Result<BranchMetadata, MemoryError> {
        Ok(BranchMetadata {
            name: self.name,
            description: self.description,
            parent_branch: self.parent_branch,
            forked_at: decode_optional_time(self.forked_at.as_deref())?,
            forked_from_item_id: self.forked_from_item_id,
            item_count: decode_count(self.item_count)?,
            created_at: decode_time(&self.created_at)?,
            updated_at: decode_time(&self.updated_at)?,
        })
    }
}

fn load_header(conn: &Connection, public_id: &str) -> Result<Option<HeaderRow>, MemoryError> {
    conn.query_row(
        "
        SELECT owner, title, status, active_branch, metadata_json, created_at, updated_at
        FROM conversations
        WHERE public_id = ?1
        ",
        params![public_id],
        |row| {
            Ok(HeaderRow {
                owner: row.get(0)?,
                title: row.get(1)?,
                status: row.get(2)?,
                active_branch: row.get(3)?,
                metadata_json: row.get(4)?,
                created_at: row.get(5)?,
                updated_at: row.get(6)?,
            })
        },
    )
    .optional()
    .map_err(sql_error("load conversation row"))
}

fn require_header(conn: &Connection, public_id: &str) -> Result<HeaderRow, MemoryError> {
    load_header(conn, public_id)?
        .ok_or_else(|| MemoryError::not_found(format!("conversation not found: {public_id}")))
}

fn load_branch(
    conn: &Connection,
    conversation_id: &str,
    name: &str,
) -> Result<Option<BranchMetadata>, MemoryError> {
    conn.query_row(
        &format!(
            "SELECT {BRANCH_COLUMNS} FROM branches WHERE conversation_id = ?1 AND name = ?2"
        ),
        params![conversation_id, name],
        BranchRow::read,
    )
    .optional()
    .map_err(sql_error("load branch row"))?
    .map(BranchRow::into_metadata)
    .transpose()
}

fn require_branch(
    conn: &Connection,
    conversation_id: &str,
    name: &str,
) -> Result<BranchMetadata, MemoryError> {
    load_branch(conn, conversation_id, name)?
        .ok_or_else(|| MemoryError::not_found(format!("branch not found: {name}")))
}

fn load_branches(
    conn: &Connection,
    conversation_id: &str,
) -> Result<Vec<BranchMetadata>, MemoryError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {BRANCH_COLUMNS} FROM branches WHERE conversation_id = ?1 ORDER BY name ASC"
        ))
        .map_err(sql_error("prepare branch query"))?;
    let rows = stmt
        .query_map(params![conversation_id], BranchRow::read)
        .map_err(sql_error("query branch rows"))?;

    let mut branches = Vec::new();
    for row in rows {
        branches.push(row.map_err(sql_error("read branch row"))?.into_metadata()?);
    }
    Ok(branches)
}

fn query_items(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Item>, MemoryError> {
    let mut stmt = conn
        .prepare(&format!("SELECT {ITEM_COLUMNS} FROM items {filter}"))
        .map_err(sql_error("prepare item query"))?;
    let rows = stmt
        .query_map(params, ItemRow::read)
        .map_err(sql_error("query item rows"))?;

    let mut items = Vec::new();
    for row in rows {
        items.push(row.map_err(sql_error("read item row"))?.into_item()?);
    }
    Ok(items)
}

fn query_ids(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<String>, MemoryError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(sql_error("prepare conversation page query"))?;
    let rows = stmt
        .query_map(params, |row| row.get::<_, String>(0))
        .map_err(sql_error("query conversation page"))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(row.map_err(sql_error("read conversation page row"))?);
    }
    Ok(ids)
}

fn load_conversation(
    conn: &Connection,
    public_id: &str,
) -> Result<Option<Conversation>, MemoryError> {
    let Some(header) = load_header(conn, public_id)? else {
        return Ok(None);
    };

    let status = header.status()?;
    let metadata: MetadataMap = serde_json::from_str(&header.metadata_json).map_err(|error| {
        MemoryError::storage(format!("failed to decode conversation metadata JSON: {error}"))
    })?;

    let mut branch_metadata = BTreeMap::new();
    let mut branches = BTreeMap::new();
    for meta in load_branches(conn, public_id)? {
        branches.insert(meta.name.clone(), Vec::new());
        branch_metadata.insert(meta.name.clone(), meta);
    }

    let items = query_items(
        conn,
        "WHERE conversation_id = ?1 ORDER BY branch ASC, sequence_number ASC",
        params![public_id],
    )?;
    for item in items {
        branches.entry(item.branch.clone()).or_insert_with(Vec::new).push(item);
    }

    Ok(Some(Conversation::restore(
        public_id.to_string(),
        PrincipalId::from(header.owner),
        header.title,
        status,
        branches,
        branch_metadata,
        header.active_branch,
        metadata,
        decode_time(&header.created_at)?,
        decode_time(&header.updated_at)?,
    )))
}

fn insert_branch(
    conn: &Connection,
    conversation_id: &str,
    meta: &BranchMetadata,
) -> Result<(), MemoryError> {
    conn.execute(
        "
        INSERT INTO branches (
            conversation_id, name, description, parent_branch, forked_at,
            forked_from_item_id, item_count, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        ",
        params![
            conversation_id,
            &meta.name,
            meta.description.as_deref(),
            meta.parent_branch.as_deref(),
            meta.forked_at.map(encode_time),
            meta.forked_from_item_id.as_deref(),
            encode_count(meta.item_count),
            encode_time(meta.created_at),
            encode_time(meta.updated_at),
        ],
    )
    .map_err(sql_error("insert branch row"))?;
    Ok(())
}

fn insert_item(conn: &Connection, item: &Item) -> Result<(), MemoryError> {
    let content_json = serde_json::to_string(&item.content).map_err(|error| {
        MemoryError::storage(format!("failed to serialize item content: {error}"))
    })?;
    let incomplete_details_json = item
        .incomplete_details
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|error| {
            MemoryError::storage(format!("failed to serialize incomplete details: {error}"))
        })?;

    conn.execute(
        "
        INSERT INTO items (
            conversation_id, branch, sequence_number, public_id, item_type, role, content_json,
            status, incomplete_at, incomplete_details_json, completed_at, response_id, rating,
            rated_at, rating_comment, created_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
        ",
        params![
            &item.conversation_id,
            &item.branch,
            encode_count(item.sequence_number),
            &item.public_id,
            item.item_type.as_str(),
            item.role.map(ItemRole::as_str),
            content_json,
            item.status.map(ItemStatus::as_str),
            item.incomplete_at.map(encode_time),
            incomplete_details_json,
            item.completed_at.map(encode_time),
            item.response_id.as_deref(),
            item.rating.map(ItemRating::as_str),
            item.rated_at.map(encode_time),
            item.rating_comment.as_deref(),
            encode_time(item.created_at),
        ],
    )
    .map_err(sql_error("insert item row"))?;
    Ok(())
}

fn touch_conversation(conn: &Connection, public_id: &str) -> Result<(), MemoryError> {
    conn.execute(
        "UPDATE conversations SET updated_at = ?2 WHERE public_id = ?1",
        params![public_id, encode_time(Utc::now())],
    )
    .map_err(sql_error("touch conversation row"))?;
    Ok(())
}

/// Branch and sequence of the copy of `item_id` that lookups resolve to:
/// the active branch first, then other branches by name.
fn locate_item(
    conn: &Connection,
    conversation_id: &str,
    item_id: &str,
) -> Result<Option<(String, i64)>, MemoryError> {
    conn.query_row(
        "
        SELECT i.branch, i.sequence_number
        FROM items i
        JOIN conversations c ON c.public_id = i.conversation_id
        WHERE i.conversation_id = ?1 AND i.public_id = ?2
        ORDER BY (i.branch = c.active_branch) DESC, i.branch ASC, i.sequence_number ASC
        LIMIT 1
        ",
        params![conversation_id, item_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )
    .optional()
    .map_err(sql_error("locate item row"))
}

fn require_item(
    conn: &Connection,
    conversation_id: &str,
    item_id: &str,
) -> Result<(String, i64), MemoryError> {
    locate_item(conn, conversation_id, item_id)?
        .ok_or_else(|| MemoryError::not_found(format!("item not found: {item_id}")))
}

impl ConversationRepository for SqliteConversationRepository {
    fn create<'a>(
        &'a self,
        conversation: &'a Conversation,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            let metadata_json = serde_json::to_string(&conversation.metadata).map_err(|error| {
                MemoryError::storage(format!("failed to serialize conversation metadata: {error}"))
            })?;

            let mut conn = self.connection()?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(sql_error("begin create transaction"))?;
            let inserted = tx
                .execute(
                    "
                    INSERT OR IGNORE INTO conversations (
                        public_id, owner, title, status, active_branch, metadata_json,
                        created_at, updated_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ",
                    params![
                        conversation.public_id(),
                        conversation.owner().as_str(),
                        conversation.title.as_deref(),
                        conversation.status().as_str(),
                        conversation.active_branch(),
                        metadata_json,
                        encode_time(conversation.created_at),
                        encode_time(conversation.updated_at),
                    ],
                )
                .map_err(sql_error("insert conversation row"))?;
            if inserted == 0 {
                return Err(MemoryError::conflict(format!(
                    "conversation already exists: {}",
                    conversation.public_id()
                )));
            }

            for meta in conversation.branches() {
                insert_branch(&tx, conversation.public_id(), meta)?;
                for item in conversation.branch_items(&meta.name) {
                    insert_item(&tx, item)?;
                }
            }

            tx.commit().map_err(sql_error("commit create transaction"))
        })
    }

    fn find_by_public_id<'a>(
        &'a self,
        public_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Conversation>, MemoryError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            load_conversation(&conn, public_id)
        })
    }

    fn update<'a>(
        &'a self,
        conversation: &'a Conversation,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            let metadata_json = serde_json::to_string(&conversation.metadata).map_err(|error| {
                MemoryError::storage(format!("failed to serialize conversation metadata: {error}"))
            })?;

            let conn = self.connection()?;
            require_header(&conn, conversation.public_id())?;
            require_branch(&conn, conversation.public_id(), conversation.active_branch())?;

            conn.execute(
                "
                UPDATE conversations
                SET title = ?2, status = ?3, active_branch = ?4, metadata_json = ?5,
                    updated_at = ?6
                WHERE public_id = ?1
                ",
                params![
                    conversation.public_id(),
                    conversation.title.as_deref(),
                    conversation.status().as_str(),
                    conversation.active_branch(),
                    metadata_json,
                    encode_time(conversation.updated_at),
                ],
            )
            .map_err(sql_error("update conversation row"))?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, public_id: &'a str) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            let status = require_header(&conn, public_id)?.status()?;
            if status != ConversationStatus::Active {
                return Err(MemoryError::invalid_state(format!(
                    "conversation {public_id} is {} and cannot become deleted",
                    status.as_str()
                )));
            }

            conn.execute(
                "UPDATE conversations SET status = ?2, updated_at = ?3 WHERE public_id = ?1",
                params![
                    public_id,
                    ConversationStatus::Deleted.as_str(),
                    encode_time(Utc::now())
                ],
            )
            .map_err(sql_error("mark conversation deleted"))?;
            Ok(())
        })
    }

    fn list_by_owner<'a>(
        &'a self,
        owner: &'a PrincipalId,
        page: Pagination,
    ) -> BoxFuture<'a, Result<Vec<Conversation>, MemoryError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            let limit = encode_count(page.effective_limit());
            let deleted = ConversationStatus::Deleted.as_str();

            let ids = match page.after.as_deref() {
                Some(cursor) => {
                    let cursor_created_at = conn
                        .query_row(
                            "
                            SELECT created_at FROM conversations
                            WHERE public_id = ?1 AND owner = ?2 AND status != ?3
                            ",
                            params![cursor, owner.as_str(), deleted],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()
                        .map_err(sql_error("load conversation cursor"))?;
                    let Some(cursor_created_at) = cursor_created_at else {
                        return Ok(Vec::new());
                    };

                    query_ids(
                        &conn,
                        "
                        SELECT public_id FROM conversations
                        WHERE owner = ?1 AND status != ?2
                            AND (created_at, public_id) < (?3, ?4)
                        ORDER BY created_at DESC, public_id DESC
                        LIMIT ?5
                        ",
                        params![owner.as_str(), deleted, cursor_created_at, cursor, limit],
                    )?
                }
                None => query_ids(
                    &conn,
                    "
                    SELECT public_id FROM conversations
                    WHERE owner = ?1 AND status != ?2
                    ORDER BY created_at DESC, public_id DESC
                    LIMIT ?3
                    ",
                    params![owner.as_str(), deleted, limit],
                )?,
            };

            let mut conversations = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(conversation) = load_conversation(&conn, &id)? {
                    conversations.push(conversation);
                }
            }
            Ok(conversations)
        })
    }

    fn append_items<'a>(
        &'a self,
        conversation_id: &'a str,
        branch: &'a str,
        items: Vec<Item>,
    ) -> BoxFuture<'a, Result<Vec<Item>, MemoryError>> {
        Box::pin(async move {
            let mut conn = self.connection()?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(sql_error("begin append transaction"))?;
            require_header(&tx, conversation_id)?;
            let meta = require_branch(&tx, conversation_id, branch)?;

            let mut next_sequence = meta.item_count;
            let mut stored = Vec::with_capacity(items.len());
            for mut item in items {
                item.conversation_id = conversation_id.to_string();
                item.branch = branch.to_string();
                item.sequence_number = next_sequence;
                insert_item(&tx, &item)?;
                next_sequence += 1;
                stored.push(item);
            }

            let now = encode_time(Utc::now());
            tx.execute(
                "
                UPDATE branches SET item_count = ?3, updated_at = ?4
                WHERE conversation_id = ?1 AND name = ?2
                ",
                params![conversation_id, branch, encode_count(next_sequence), &now],
            )
            .map_err(sql_error("update branch item count"))?;
            tx.execute(
                "UPDATE conversations SET updated_at = ?2 WHERE public_id = ?1",
                params![conversation_id, &now],
            )
            .map_err(sql_error("touch conversation row"))?;

            tx.commit().map_err(sql_error("commit append transaction"))?;
            Ok(stored)
        })
    }

    fn list_items<'a>(
        &'a self,
        conversation_id: &'a str,
        branch: &'a str,
        page: Pagination,
    ) -> BoxFuture<'a, Result<Vec<Item>, MemoryError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            require_header(&conn, conversation_id)?;
            require_branch(&conn, conversation_id, branch)?;

            let after_sequence = match page.after.as_deref() {
                Some(cursor) => {
                    let sequence = conn
                        .query_row(
                            "
                            SELECT sequence_number FROM items
                            WHERE conversation_id = ?1 AND branch = ?2 AND public_id = ?3
                            ORDER BY sequence_number ASC
                            LIMIT 1
                            ",
                            params![conversation_id, branch, cursor],
                            |row| row.get::<_, i64>(0),
                        )
                        .optional()
                        .map_err(sql_error("load item cursor"))?;
                    match sequence {
                        Some(sequence) => sequence,
                        None => return Ok(Vec::new()),
                    }
                }
                None => -1,
            };

            query_items(
                &conn,
                "
                WHERE conversation_id = ?1 AND branch = ?2 AND sequence_number > ?3
                ORDER BY sequence_number ASC
                LIMIT ?4
                ",
                params![
                    conversation_id,
                    branch,
                    after_sequence,
                    encode_count(page.effective_limit())
                ],
            )
        })
    }

    fn search_items<'a>(
        &'a self,
        conversation_id: &'a str,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Vec<Item>, MemoryError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            require_header(&conn, conversation_id)?;
            let items = query_items(
                &conn,
                "WHERE conversation_id = ?1 ORDER BY branch ASC, sequence_number ASC",
                params![conversation_id],
            )?;
            Ok(items
                .into_iter()
                .filter(|item| item.matches_query(query))
                .collect())
        })
    }

    fn count_items<'a>(
        &'a self,
        conversation_id: &'a str,
        branch: &'a str,
    ) -> BoxFuture<'a, Result<usize, MemoryError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            require_header(&conn, conversation_id)?;
            Ok(require_branch(&conn, conversation_id, branch)?.item_count)
        })
    }

    fn get_item<'a>(
        &'a self,
        conversation_id: &'a str,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<Item>, MemoryError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            require_header(&conn, conversation_id)?;
            let Some((branch, sequence)) = locate_item(&conn, conversation_id, item_id)? else {
                return Ok(None);
            };
            Ok(query_items(
                &conn,
                "WHERE conversation_id = ?1 AND branch = ?2 AND sequence_number = ?3",
                params![conversation_id, branch, sequence],
            )?
            .into_iter()
            .next())
        })
    }

    fn create_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        metadata: BranchMetadata,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            require_header(&conn, conversation_id)?;
            if metadata.name.trim().is_empty() {
                return Err(MemoryError::invalid_request("branch name must not be empty"));
            }
            if load_branch(&conn, conversation_id, &metadata.name)?.is_some() {
                return Err(MemoryError::conflict(format!(
                    "branch already exists: {}",
                    metadata.name
                )));
            }

            let metadata = BranchMetadata {
                item_count: 0,
                ..metadata
            };
            insert_branch(&conn, conversation_id, &metadata)?;
            touch_conversation(&conn, conversation_id)
        })
    }

    fn get_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<Option<BranchMetadata>, MemoryError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            require_header(&conn, conversation_id)?;
            load_branch(&conn, conversation_id, name)
        })
    }

    fn list_branches<'a>(
        &'a self,
        conversation_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<BranchMetadata>, MemoryError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            require_header(&conn, conversation_id)?;
            load_branches(&conn, conversation_id)
        })
    }

    fn delete_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            let mut conn = self.connection()?;
            let header = require_header(&conn, conversation_id)?;
            if name == MAIN_BRANCH {
                return Err(MemoryError::invalid_request("the MAIN branch cannot be deleted"));
            }
            if name == header.active_branch {
                return Err(MemoryError::invalid_state(format!(
                    "branch {name} is active; switch branches before deleting it"
                )));
            }
            require_branch(&conn, conversation_id, name)?;

            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(sql_error("begin branch delete transaction"))?;
            tx.execute(
                "DELETE FROM items WHERE conversation_id = ?1 AND branch = ?2",
                params![conversation_id, name],
            )
            .map_err(sql_error("delete branch items"))?;
            tx.execute(
                "DELETE FROM branches WHERE conversation_id = ?1 AND name = ?2",
                params![conversation_id, name],
            )
            .map_err(sql_error("delete branch row"))?;
            touch_conversation(&tx, conversation_id)?;
            tx.commit()
                .map_err(sql_error("commit branch delete transaction"))
        })
    }

    fn set_active_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            require_header(&conn, conversation_id)?;
            require_branch(&conn, conversation_id, name)?;
            conn.execute(
                "UPDATE conversations SET active_branch = ?2, updated_at = ?3 WHERE public_id = ?1",
                params![conversation_id, name, encode_time(Utc::now())],
            )
            .map_err(sql_error("update active branch"))?;
            Ok(())
        })
    }

    fn fork_branch<'a>(
        &'a self,
        conversation_id: &'a str,
        request: ForkRequest,
    ) -> BoxFuture<'a, Result<BranchMetadata, MemoryError>> {
        Box::pin(async move {
            let mut conn = self.connection()?;
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(sql_error("begin fork transaction"))?;
            require_header(&tx, conversation_id)?;
            if request.new_branch.trim().is_empty() {
                return Err(MemoryError::invalid_request("branch name must not be empty"));
            }
            if load_branch(&tx, conversation_id, &request.new_branch)?.is_some() {
                return Err(MemoryError::conflict(format!(
                    "branch already exists: {}",
                    request.new_branch
                )));
            }
            require_branch(&tx, conversation_id, &request.source_branch)?;

            let from_item_id = request.from_item_id.as_deref().filter(|id| !id.is_empty());
            let fork_sequence = match from_item_id {
                Some(item_id) => Some(
                    tx.query_row(
                        "
                        SELECT sequence_number FROM items
                        WHERE conversation_id = ?1 AND branch = ?2 AND public_id = ?3
                        ORDER BY sequence_number ASC
                        LIMIT 1
                        ",
                        params![conversation_id, &request.source_branch, item_id],
                        |row| row.get::<_, i64>(0),
                    )
                    .optional()
                    .map_err(sql_error("locate fork item"))?
                    .ok_or_else(|| MemoryError::not_found(format!("item not found: {item_id}")))?,
                ),
                None => None,
            };

            let copied = match fork_sequence {
                Some(sequence) => tx
                    .execute(
                        "
                        INSERT INTO items (
                            conversation_id, branch, sequence_number, public_id, item_type,
                            role, content_json, status, incomplete_at, incomplete_details_json,
                            completed_at, response_id, rating, rated_at, rating_comment,
                            created_at
                        )
                        SELECT
                            conversation_id, ?3, sequence_number, public_id, item_type,
                            role, content_json, status, incomplete_at, incomplete_details_json,
                            completed_at, response_id, rating, rated_at, rating_comment,
                            created_at
                        FROM items
                        WHERE conversation_id = ?1 AND branch = ?2 AND sequence_number <= ?4
                        ",
                        params![
                            conversation_id,
                            &request.source_branch,
                            &request.new_branch,
                            sequence
                        ],
                    )
                    .map_err(sql_error("copy fork items"))?,
                None => 0,
            };

            let now = Utc::now();
            let metadata = BranchMetadata {
                name: request.new_branch.clone(),
                description: request.description.clone(),
                parent_branch: Some(request.source_branch.clone()),
                forked_at: Some(now),
                forked_from_item_id: from_item_id.map(str::to_string),
                item_count: copied,
                created_at: now,
                updated_at: now,
            };
            insert_branch(&tx, conversation_id, &metadata)?;
            touch_conversation(&tx, conversation_id)?;
            tx.commit().map_err(sql_error("commit fork transaction"))?;

            Ok(metadata)
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
            let conn = self.connection()?;
            require_header(&conn, conversation_id)?;
            let (branch, sequence) = require_item(&conn, conversation_id, item_id)?;
            conn.execute(
                "
                UPDATE items SET rating = ?4, rated_at = ?5, rating_comment = ?6
                WHERE conversation_id = ?1 AND branch = ?2 AND sequence_number = ?3
                ",
                params![
                    conversation_id,
                    branch,
                    sequence,
                    rating.as_str(),
                    encode_time(Utc::now()),
                    comment
                ],
            )
            .map_err(sql_error("rate item"))?;
            touch_conversation(&conn, conversation_id)
        })
    }

    fn get_item_rating<'a>(
        &'a self,
        conversation_id: &'a str,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<Option<ItemRating>, MemoryError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            require_header(&conn, conversation_id)?;
            let (branch, sequence) = require_item(&conn, conversation_id, item_id)?;
            let rating = conn
                .query_row(
                    "
                    SELECT rating FROM items
                    WHERE conversation_id = ?1 AND branch = ?2 AND sequence_number = ?3
                    ",
                    params![conversation_id, branch, sequence],
                    |row| row.get::<_, Option<String>>(0),
                )
                .map_err(sql_error("load item rating"))?;
            decode_wire(rating.as_deref(), ItemRating::parse, "item rating")
        })
    }

    fn remove_item_rating<'a>(
        &'a self,
        conversation_id: &'a str,
        item_id: &'a str,
    ) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            let conn = self.connection()?;
            require_header(&conn, conversation_id)?;
            let (branch, sequence) = require_item(&conn, conversation_id, item_id)?;
            conn.execute(
                "
                UPDATE items SET rating = NULL, rated_at = NULL, rating_comment = NULL
                WHERE conversation_id = ?1 AND branch = ?2 AND sequence_number = ?3
                ",
                params![conversation_id, branch, sequence],
            )
            .map_err(sql_error("clear item rating"))?;
            touch_conversation(&conn, conversation_id)
        })
    }
}

/// SQLite-backed idempotency records keyed by principal, method, path, and key.
#[derive(Debug)]
pub struct SqliteIdempotencyStore {
    connection: Mutex<Connection>,
}

impl SqliteIdempotencyStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, MemoryError> {
        Ok(Self {
            connection: Mutex::new(open_connection(Some(path.as_ref()))?),
        })
    }

    pub fn new_in_memory() -> Result<Self, MemoryError> {
        Ok(Self {
            connection: Mutex::new(open_connection(None)?),
        })
    }
}

impl IdempotencyStore for SqliteIdempotencyStore {
    fn get<'a>(
        &'a self,
        key: &'a IdempotencyKey,
    ) -> BoxFuture<'a, Result<Option<IdempotencyRecord>, MemoryError>> {
        Box::pin(async move {
            let conn = lock_connection(&self.connection)?;
            let row = conn
                .query_row(
                    "
                    SELECT status, content_type, body, created_at
                    FROM idempotency_records
                    WHERE principal_id = ?1 AND method = ?2 AND path = ?3
                        AND idempotency_key = ?4
                    ",
                    params![key.principal_id.as_str(), &key.method, &key.path, &key.key],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(sql_error("load idempotency record"))?;

            let Some((status, content_type, body, created_at)) = row else {
                return Ok(None);
            };
            let status = u16::try_from(status).map_err(|_| {
                MemoryError::storage(format!("stored response status out of range: {status}"))
            })?;

            Ok(Some(IdempotencyRecord {
                key: key.clone(),
                status,
                content_type,
                body,
                created_at: decode_time(&created_at)?,
            }))
        })
    }

    fn save<'a>(&'a self, record: IdempotencyRecord) -> BoxFuture<'a, Result<(), MemoryError>> {
        Box::pin(async move {
            let conn = lock_connection(&self.connection)?;
            let inserted = conn
                .execute(
                    "
                    INSERT OR IGNORE INTO idempotency_records (
                        principal_id, method, path, idempotency_key, status, content_type,
                        body, created_at
                    )
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                    ",
                    params![
                        record.key.principal_id.as_str(),
                        &record.key.method,
                        &record.key.path,
                        &record.key.key,
                        i64::from(record.status),
                        record.content_type.as_deref(),
                        &record.body,
                        encode_time(record.created_at),
                    ],
                )
                .map_err(sql_error("insert idempotency record"))?;

            if inserted == 0 {
                return Err(MemoryError::conflict(format!(
                    "idempotency key already recorded: {}",
                    record.key.key
                )));
            }
            Ok(())
        })
    }
}

fn encode_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_time(value: &str) -> Result<DateTime<Utc>, MemoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| MemoryError::storage(format!("invalid stored timestamp '{value}': {error}")))
}

fn decode_optional_time(value: Option<&str>) -> Result<Option<DateTime<Utc>>, MemoryError> {
    value.map(decode_time).transpose()
}

fn decode_wire<T>(
    value: Option<&str>,
    parse: fn(&str) -> Option<T>,
    what: &str,
) -> Result<Option<T>, MemoryError> {
    value
        .map(|raw| {
            parse(raw).ok_or_else(|| MemoryError::storage(format!("unknown {what} '{raw}'")))
        })
        .transpose()
}

fn encode_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn decode_count(value: i64) -> Result<usize, MemoryError> {
    usize::try_from(value)
        .map_err(|_| MemoryError::storage(format!("stored count must be non-negative, got {value}")))
}

pub(crate) fn default_sqlite_path() -> PathBuf {
    if let Some(explicit) = std::env::var_os("GANTRY_SQLITE_PATH") {
        return PathBuf::from(explicit);
    }

    if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
        return PathBuf::from(home).join(".gantry").join("gantry.sqlite3");
    }

    PathBuf::from("gantry.sqlite3")
}

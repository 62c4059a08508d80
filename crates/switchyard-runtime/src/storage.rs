use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::types::{ChatMessage, Role};

/// A stored conversation header.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A stored message row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub role: Role,
    pub content: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
            name: self.name.clone(),
        }
    }
}

/// Narrow CRUD surface over conversation rows. Calls are synchronous.
pub trait ConversationStore: Send + Sync {
    fn create_conversation(&self, name: Option<&str>) -> Result<Conversation>;

    /// Fails if no conversation has this id.
    fn rename_conversation(&self, id: i64, name: &str) -> Result<()>;

    fn conversation(&self, id: i64) -> Result<Option<Conversation>>;

    /// Fails if the conversation does not exist.
    fn save_message(&self, conversation_id: i64, message: &ChatMessage) -> Result<i64>;

    /// Newest first.
    fn recent_messages(
        &self,
        conversation_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>>;

    fn list_conversations(&self) -> Result<Vec<Conversation>>;
}

/// SQLite-backed conversation store.
pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
}

impl SqliteConversationStore {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path).context("Failed to open conversation database")?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("Failed to enable WAL mode")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("Failed to enable foreign keys")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS conversation (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS message (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL
                    REFERENCES conversation(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                name TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS message_conversation_idx
                ON message(conversation_id, created_at);",
        )
        .context("Failed to initialize conversation tables")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow!("DB lock poisoned: {}", e))
    }
}

// Fixed-width so that text ordering matches time ordering.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    let created: String = row.get(2)?;
    Ok(Conversation {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: parse_time(&created)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    let role: String = row.get(2)?;
    let created: String = row.get(5)?;
    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role: role.parse().map_err(|e: crate::error::RelayError| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
        })?,
        content: row.get(3)?,
        name: row.get(4)?,
        created_at: parse_time(&created)?,
    })
}

impl ConversationStore for SqliteConversationStore {
    fn create_conversation(&self, name: Option<&str>) -> Result<Conversation> {
        let conn = self.lock()?;
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO conversation (name, created_at) VALUES (?1, ?2)",
            params![name, timestamp(&created_at)],
        )
        .context("Failed to create conversation")?;

        Ok(Conversation {
            id: conn.last_insert_rowid(),
            name: name.map(str::to_string),
            created_at,
        })
    }

    fn rename_conversation(&self, id: i64, name: &str) -> Result<()> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE conversation SET name = ?1 WHERE id = ?2",
                params![name, id],
            )
            .context("Failed to rename conversation")?;
        if changed != 1 {
            bail!("conversation {} not found", id);
        }
        Ok(())
    }

    fn conversation(&self, id: i64) -> Result<Option<Conversation>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, name, created_at FROM conversation WHERE id = ?1",
            params![id],
            conversation_from_row,
        )
        .optional()
        .context("Failed to load conversation")
    }

    fn save_message(&self, conversation_id: i64, message: &ChatMessage) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO message (conversation_id, role, content, name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                conversation_id,
                message.role.as_str(),
                message.content,
                message.name,
                timestamp(&Utc::now()),
            ],
        )
        .with_context(|| format!("Failed to save message to conversation {}", conversation_id))?;
        Ok(conn.last_insert_rowid())
    }

    fn recent_messages(
        &self,
        conversation_id: i64,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<StoredMessage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, role, content, name, created_at
             FROM message
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )?;

        let messages = stmt
            .query_map(
                params![conversation_id, limit as i64, offset as i64],
                message_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to load messages")?;
        Ok(messages)
    }

    fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT id, name, created_at FROM conversation ORDER BY id")?;
        let conversations = stmt
            .query_map([], conversation_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list conversations")?;
        Ok(conversations)
    }
}

/// Load up to `limit` stored messages of a conversation, oldest first.
pub fn load_history(
    store: &dyn ConversationStore,
    conversation_id: i64,
    limit: usize,
) -> Result<Vec<ChatMessage>> {
    let mut rows = store.recent_messages(conversation_id, limit, 0)?;
    rows.reverse();
    Ok(rows.iter().map(StoredMessage::to_chat_message).collect())
}

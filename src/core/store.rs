//! Conversation storage using SQLite
//!
//! Each conversation is treated as one document: `save` rewrites the title,
//! timestamps and full message list in a single transaction. There is no
//! version check between concurrent writers, the last save wins.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::conversation::{Conversation, ConversationSummary, Message, Role};

/// Errors from the conversation store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage is not available")]
    Unavailable,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),
}

/// Persistence for conversations
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Whether the backing database is connected and ready for use
    fn is_available(&self) -> bool;

    async fn find_by_id(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    /// Insert a new, empty conversation
    async fn create(&self, title: &str) -> Result<Conversation, StoreError>;

    /// Persist the whole conversation and bump its `updated_at`
    async fn save(&self, conversation: &mut Conversation) -> Result<(), StoreError>;

    /// Remove a conversation. Absent ids are not an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// All conversations, most recently updated first
    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError>;
}

/// SQLite-backed conversation store
pub struct SqliteStore {
    pool: SqlitePool,
    ready: AtomicBool,
}

impl SqliteStore {
    /// Open a lazily connected store. Nothing touches the database until
    /// [`SqliteStore::connect`] runs, and the store reports itself unavailable
    /// until then.
    pub fn open(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        let pool = if url.contains(":memory:") {
            // Every connection to :memory: is a separate database
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_lazy_with(options)
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_lazy_with(options)
        };

        Ok(Self {
            pool,
            ready: AtomicBool::new(false),
        })
    }

    /// Connect, create the schema and mark the store ready
    pub async fn connect(&self) -> Result<(), sqlx::Error> {
        self.init_schema().await?;
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Close the pool; the store reports itself unavailable afterwards
    pub async fn close(&self) {
        self.ready.store(false, Ordering::Release);
        self.pool.close().await;
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let store = Self::open("sqlite::memory:")?;
        store.connect().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                conversation_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                PRIMARY KEY (conversation_id, position),
                FOREIGN KEY (conversation_id) REFERENCES conversations(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_conversations_updated
            ON conversations(updated_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable)
        }
    }

    async fn load_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT role, content
            FROM messages
            WHERE conversation_id = ?
            ORDER BY position ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(role, content)| {
                let role = Role::from_str(&role)
                    .map_err(|e| StoreError::InvalidRecord(format!("{conversation_id}: {e}")))?;
                Ok::<_, StoreError>(Message { role, content })
            })
            .collect()
    }
}

#[async_trait]
impl ConversationStore for SqliteStore {
    fn is_available(&self) -> bool {
        self.ready.load(Ordering::Acquire) && !self.pool.is_closed()
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        self.ensure_ready()?;

        let row: Option<(String, String, String, String)> = sqlx::query_as(
            r#"
            SELECT id, title, created_at, updated_at
            FROM conversations
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((id, title, created_at, updated_at)) = row else {
            return Ok(None);
        };

        let messages = self.load_messages(&id).await?;

        Ok(Some(Conversation {
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
            id,
            title,
            messages,
        }))
    }

    async fn create(&self, title: &str) -> Result<Conversation, StoreError> {
        self.ensure_ready()?;

        let conversation = Conversation::new(title);

        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&conversation.id)
        .bind(&conversation.title)
        .bind(format_timestamp(&conversation.created_at))
        .bind(format_timestamp(&conversation.updated_at))
        .execute(&self.pool)
        .await?;

        tracing::debug!(conversation_id = %conversation.id, "Created conversation");
        Ok(conversation)
    }

    async fn save(&self, conversation: &mut Conversation) -> Result<(), StoreError> {
        self.ensure_ready()?;

        conversation.updated_at = Utc::now();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO conversations (id, title, created_at, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&conversation.id)
        .bind(&conversation.title)
        .bind(format_timestamp(&conversation.created_at))
        .bind(format_timestamp(&conversation.updated_at))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(&conversation.id)
            .execute(&mut *tx)
            .await?;

        for (position, message) in conversation.messages.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO messages (conversation_id, position, role, content)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&conversation.id)
            .bind(position as i64)
            .bind(message.role.as_str())
            .bind(&message.content)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            conversation_id = %conversation.id,
            messages = conversation.messages.len(),
            "Saved conversation"
        );
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.ensure_ready()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ConversationSummary>, StoreError> {
        self.ensure_ready()?;

        let rows: Vec<(String, String, String)> = sqlx::query_as(
            r#"
            SELECT id, title, updated_at
            FROM conversations
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, title, updated_at)| {
                Ok::<_, StoreError>(ConversationSummary {
                    id,
                    title,
                    updated_at: parse_timestamp(&updated_at)?,
                })
            })
            .collect()
    }
}

// Fixed-width UTC timestamps so that TEXT ordering matches time ordering
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidRecord(format!("bad timestamp {raw:?}: {e}")))
}

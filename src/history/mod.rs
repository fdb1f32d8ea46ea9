//! Conversation persistence over Postgres.
//!
//! The store is deliberately non-fatal: if the database is missing or
//! unreachable it runs degraded and every operation returns
//! [`PersistenceError::Unavailable`] instead of failing the chat path.
//! Transient errors are retried with exponential backoff; when the retries
//! are exhausted on a connectivity error the store flips to degraded and
//! attempts one pool rebuild.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::errors::PersistenceError;
use crate::core::settings::Settings;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(4);

const CREATE_CONVERSATION_SQL: &str = "INSERT INTO conversations (id, created_at, updated_at, metadata)
     VALUES ($1, NOW(), NOW(), $2)
     ON CONFLICT (id) DO NOTHING";

const GET_MESSAGES_SQL: &str = "SELECT id, session_id, role, content, timestamp, citations, selected_text
     FROM messages
     WHERE session_id = $1
     ORDER BY timestamp ASC
     LIMIT $2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Unknown role strings coerce to `user` rather than failing a read.
    pub fn parse(raw: &str) -> Role {
        match raw {
            "assistant" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub citations: Vec<String>,
    pub selected_text: String,
}

#[derive(Debug, Clone)]
struct PoolConfig {
    url: String,
    max_connections: u32,
    min_connections: u32,
    max_lifetime: Duration,
}

enum PoolState {
    Healthy(PgPool),
    Degraded,
}

pub struct ConversationStore {
    state: RwLock<PoolState>,
    config: Option<PoolConfig>,
    #[cfg(test)]
    write_attempts: std::sync::atomic::AtomicUsize,
}

impl ConversationStore {
    /// Connect to Postgres. Never fails: a missing `DATABASE_URL` or an
    /// unreachable server yields a degraded store.
    pub async fn connect(settings: &Settings) -> Self {
        let Some(url) = settings.database_url.clone() else {
            tracing::warn!("DATABASE_URL is not set; conversation persistence disabled");
            return Self::disabled();
        };

        let config = PoolConfig {
            url,
            max_connections: settings.db_pool_size + settings.db_max_overflow,
            min_connections: settings.db_pool_size,
            max_lifetime: Duration::from_secs(settings.db_pool_recycle_secs),
        };

        let state = match Self::build_pool(&config).await {
            Ok(pool) => {
                tracing::info!("connected to conversation database");
                PoolState::Healthy(pool)
            }
            Err(e) => {
                tracing::warn!("database unreachable, starting degraded: {}", e);
                PoolState::Degraded
            }
        };

        Self {
            state: RwLock::new(state),
            config: Some(config),
            #[cfg(test)]
            write_attempts: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// A store with no database behind it. Every operation reports
    /// [`PersistenceError::Unavailable`].
    pub fn disabled() -> Self {
        Self {
            state: RwLock::new(PoolState::Degraded),
            config: None,
            #[cfg(test)]
            write_attempts: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn write_attempts(&self) -> usize {
        self.write_attempts
            .load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn build_pool(config: &PoolConfig) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .max_lifetime(config.max_lifetime)
            // Stale connections are detected on checkout, not at use time.
            .test_before_acquire(true)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.url)
            .await
    }

    pub async fn is_degraded(&self) -> bool {
        matches!(*self.state.read().await, PoolState::Degraded)
    }

    async fn pool(&self) -> Option<PgPool> {
        match &*self.state.read().await {
            PoolState::Healthy(pool) => Some(pool.clone()),
            PoolState::Degraded => None,
        }
    }

    /// Flip to degraded, then try one pool rebuild so a blip does not
    /// require a restart.
    async fn degrade_and_rebuild(&self) {
        let Some(config) = &self.config else {
            return;
        };

        {
            let mut state = self.state.write().await;
            *state = PoolState::Degraded;
        }
        tracing::warn!("conversation store degraded after repeated database errors");

        match Self::build_pool(config).await {
            Ok(pool) => {
                let mut state = self.state.write().await;
                *state = PoolState::Healthy(pool);
                tracing::info!("conversation database reconnected");
            }
            Err(e) => {
                tracing::warn!("database reconnect failed: {}", e);
            }
        }
    }

    /// Run an operation with retry on transient errors. Non-transient
    /// errors (constraint violations, bad SQL) surface immediately.
    async fn run<T, F, Fut>(&self, op: F) -> Result<T, PersistenceError>
    where
        F: Fn(PgPool) -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let mut delay = RETRY_BASE_DELAY;

        for attempt in 1..=RETRY_ATTEMPTS {
            let Some(pool) = self.pool().await else {
                return Err(PersistenceError::Unavailable);
            };

            match op(pool).await {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) => {
                    if attempt == RETRY_ATTEMPTS {
                        self.degrade_and_rebuild().await;
                        return Err(PersistenceError::Query(e.to_string()));
                    }
                    tracing::warn!(
                        "transient database error (attempt {}/{}): {}",
                        attempt,
                        RETRY_ATTEMPTS,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RETRY_MAX_DELAY);
                }
                Err(e) => return Err(PersistenceError::Query(e.to_string())),
            }
        }

        unreachable!("retry loop always returns")
    }

    /// Create a conversation row. Idempotent: creating an id that already
    /// exists is a no-op and keeps the existing metadata.
    pub async fn create_conversation(
        &self,
        id: &str,
        metadata: Value,
    ) -> Result<(), PersistenceError> {
        self.run(|pool| {
            let id = id.to_string();
            let metadata = metadata.clone();
            async move {
                sqlx::query(CREATE_CONVERSATION_SQL)
                    .bind(&id)
                    .bind(&metadata)
                    .execute(&pool)
                    .await?;
                Ok(())
            }
        })
        .await
    }

    pub async fn get_conversation(
        &self,
        id: &str,
    ) -> Result<Option<Conversation>, PersistenceError> {
        self.run(|pool| {
            let id = id.to_string();
            async move {
                let row = sqlx::query(
                    "SELECT id, created_at, updated_at, metadata
                     FROM conversations WHERE id = $1",
                )
                .bind(&id)
                .fetch_optional(&pool)
                .await?;

                Ok(row.map(|row| Conversation {
                    id: row.get("id"),
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                    metadata: row.get("metadata"),
                }))
            }
        })
        .await
    }

    pub async fn add_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        citations: &[String],
        selected_text: &str,
    ) -> Result<(), PersistenceError> {
        #[cfg(test)]
        self.write_attempts
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        self.run(|pool| {
            let id = Uuid::new_v4().to_string();
            let session_id = session_id.to_string();
            let content = content.to_string();
            let citations = serde_json::json!(citations);
            let selected_text = selected_text.to_string();
            async move {
                sqlx::query(
                    "INSERT INTO messages
                       (id, session_id, role, content, timestamp, citations, selected_text)
                     VALUES ($1, $2, $3, $4, NOW(), $5, $6)",
                )
                .bind(&id)
                .bind(&session_id)
                .bind(role.as_str())
                .bind(&content)
                .bind(&citations)
                .bind(&selected_text)
                .execute(&pool)
                .await?;

                sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
                    .bind(&session_id)
                    .execute(&pool)
                    .await?;
                Ok(())
            }
        })
        .await
    }

    /// Fetch the oldest `limit` messages in ascending timestamp order.
    pub async fn get_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, PersistenceError> {
        self.run(|pool| {
            let session_id = session_id.to_string();
            let limit = limit as i64;
            async move {
                let rows = sqlx::query(GET_MESSAGES_SQL)
                    .bind(&session_id)
                    .bind(limit)
                    .fetch_all(&pool)
                    .await?;

                let messages = rows
                    .into_iter()
                    .map(|row| {
                        let role: String = row.get("role");
                        let citations: Value = row.get("citations");
                        StoredMessage {
                            id: row.get("id"),
                            session_id: row.get("session_id"),
                            role: Role::parse(&role),
                            content: row.get("content"),
                            timestamp: row.get("timestamp"),
                            citations: citation_list(&citations),
                            selected_text: row.get("selected_text"),
                        }
                    })
                    .collect::<Vec<_>>();
                Ok(messages)
            }
        })
        .await
    }

    /// Check that the expected tables and columns exist. Run at startup;
    /// a mismatch is reported, not fixed.
    pub async fn validate_schema(&self) -> Result<(), PersistenceError> {
        let expected: &[(&str, &[&str])] = &[
            (
                "conversations",
                &["id", "created_at", "updated_at", "metadata"],
            ),
            (
                "messages",
                &[
                    "id",
                    "session_id",
                    "role",
                    "content",
                    "timestamp",
                    "citations",
                    "selected_text",
                ],
            ),
        ];

        let columns = self
            .run(|pool| async move {
                let rows = sqlx::query(
                    "SELECT table_name, column_name
                     FROM information_schema.columns
                     WHERE table_schema = 'public'
                       AND table_name IN ('conversations', 'messages')",
                )
                .fetch_all(&pool)
                .await?;

                Ok(rows
                    .into_iter()
                    .map(|row| {
                        let table: String = row.get("table_name");
                        let column: String = row.get("column_name");
                        (table, column)
                    })
                    .collect::<Vec<_>>())
            })
            .await?;

        let mut missing = Vec::new();
        for (table, cols) in expected {
            for col in *cols {
                let present = columns
                    .iter()
                    .any(|(t, c)| t == table && c == col);
                if !present {
                    missing.push(format!("{}.{}", table, col));
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PersistenceError::Query(format!(
                "schema is missing columns: {}",
                missing.join(", ")
            )))
        }
    }

    pub async fn health_check(&self) -> bool {
        let Some(pool) = self.pool().await else {
            return false;
        };
        sqlx::query("SELECT 1").execute(&pool).await.is_ok()
    }
}

fn citation_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Connectivity-class errors worth retrying. Query-shape and constraint
/// errors never are.
fn is_transient(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
    )
}

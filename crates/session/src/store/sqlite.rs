//! SQLite-backed session store (survives restarts).

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;

use stockdesk_auth::User;

use super::{PersistedSession, SessionStore, StoreError, TOKEN_SLOT, USER_SLOT};
use crate::types::Token;

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Backend(value.to_string())
    }
}

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

/// Session slots in a single `session_slots` table.
///
/// The pool is opened lazily on first use, so constructing a store never
/// touches disk.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    location: Location,
    pool: Arc<Mutex<Option<SqlitePool>>>,
}

impl SqliteStore {
    /// Store backed by the database file at `path` (created if missing).
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::at(Location::File(path.into()))
    }

    /// Store at `{app_data_dir}/stockdesk/session.db`.
    pub fn default_location() -> Result<Self, StoreError> {
        Ok(Self::open(default_db_path()?))
    }

    /// Private in-memory database; contents vanish with the store.
    pub fn in_memory() -> Self {
        Self::at(Location::Memory)
    }

    fn at(location: Location) -> Self {
        Self {
            location,
            pool: Arc::new(Mutex::new(None)),
        }
    }

    async fn connect(&self) -> Result<SqlitePool, StoreError> {
        let pool = match &self.location {
            Location::File(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let options = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true);
                SqlitePool::connect_with(options).await?
            }
            // One connection that never expires: every connection to
            // `:memory:` would otherwise see its own empty database.
            Location::Memory => {
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
                    .connect("sqlite::memory:")
                    .await?
            }
        };

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS session_slots (
                slot       TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                stored_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(pool)
    }

    /// Get the pool, initializing if necessary.
    async fn pool(&self) -> Result<SqlitePool, StoreError> {
        let mut guard = self.pool.lock().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }

        let pool = self.connect().await?;
        tracing::debug!(location = ?self.location, "session store opened");
        *guard = Some(pool.clone());
        Ok(pool)
    }
}

async fn upsert<'c, E>(executor: E, slot: &str, value: &str, now: &str) -> Result<(), StoreError>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO session_slots (slot, value, stored_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(slot)
        DO UPDATE SET
            value = excluded.value,
            stored_at = excluded.stored_at
        "#,
    )
    .bind(slot)
    .bind(value)
    .bind(now)
    .execute(executor)
    .await?;

    Ok(())
}

fn encode_user(user: &User) -> Result<String, StoreError> {
    serde_json::to_string(user).map_err(|e| StoreError::Backend(format!("serialize user: {e}")))
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn load(&self) -> Result<PersistedSession, StoreError> {
        let pool = self.pool().await?;

        let rows = sqlx::query(
            r#"
            SELECT slot, value, stored_at
            FROM session_slots
            WHERE slot IN (?1, ?2)
            "#,
        )
        .bind(TOKEN_SLOT)
        .bind(USER_SLOT)
        .fetch_all(&pool)
        .await?;

        let mut session = PersistedSession::default();
        for row in rows {
            let slot: String = row.try_get("slot")?;
            let value: String = row.try_get("value")?;

            if slot == TOKEN_SLOT {
                let stored_at: String = row.try_get("stored_at")?;
                session.token = Some(Token::new(value).map_err(|e| StoreError::Corrupt {
                    slot: TOKEN_SLOT,
                    reason: e.to_string(),
                })?);
                session.stored_at = DateTime::parse_from_rfc3339(&stored_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok();
            } else {
                session.user = Some(serde_json::from_str(&value).map_err(|e| {
                    StoreError::Corrupt {
                        slot: USER_SLOT,
                        reason: e.to_string(),
                    }
                })?);
            }
        }

        Ok(session)
    }

    async fn save(&self, token: &Token, user: &User) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let user_json = encode_user(user)?;
        let now = Utc::now().to_rfc3339();

        let mut tx = pool.begin().await?;
        upsert(&mut *tx, TOKEN_SLOT, token.as_str(), &now).await?;
        upsert(&mut *tx, USER_SLOT, &user_json, &now).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        let pool = self.pool().await?;
        let user_json = encode_user(user)?;
        let now = Utc::now().to_rfc3339();

        upsert(&pool, USER_SLOT, &user_json, &now).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let pool = self.pool().await?;

        sqlx::query(
            r#"
            DELETE FROM session_slots
            WHERE slot IN (?1, ?2)
            "#,
        )
        .bind(TOKEN_SLOT)
        .bind(USER_SLOT)
        .execute(&pool)
        .await?;

        Ok(())
    }
}

/// Resolve the path to the session database:
/// `{app_data_dir}/stockdesk/session.db`.
pub fn default_db_path() -> Result<PathBuf, StoreError> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .ok_or_else(|| {
            StoreError::Backend(
                "failed to resolve OS app data directory - tried data_dir() and home_dir()/.local/share"
                    .to_string(),
            )
        })?;

    let mut path = base;
    path.push("stockdesk");
    path.push("session.db");
    Ok(path)
}

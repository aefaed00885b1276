//! Persisted session store.
//!
//! Two slots, `token` and `user`, that survive restarts. Both are written
//! together on sign-in and cleared together on teardown; implementations must
//! never leave one slot cleared and the other populated.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use stockdesk_auth::User;

use crate::types::Token;

pub(crate) const TOKEN_SLOT: &str = "token";
pub(crate) const USER_SLOT: &str = "user";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store backend error: {0}")]
    Backend(String),

    #[error("session store holds a corrupt '{slot}' slot: {reason}")]
    Corrupt { slot: &'static str, reason: String },

    #[error("session store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Contents of the store as read at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedSession {
    pub token: Option<Token>,
    pub user: Option<User>,
    /// When the token slot was last written.
    pub stored_at: Option<DateTime<Utc>>,
}

impl PersistedSession {
    /// Both slots populated.
    pub fn into_parts(self) -> Option<(Token, User)> {
        match (self.token, self.user) {
            (Some(token), Some(user)) => Some((token, user)),
            _ => None,
        }
    }

    /// Exactly one slot populated.
    pub fn is_partial(&self) -> bool {
        self.token.is_some() != self.user.is_some()
    }
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<PersistedSession, StoreError>;

    /// Write both slots atomically.
    async fn save(&self, token: &Token, user: &User) -> Result<(), StoreError>;

    /// Replace the cached user, keeping the token.
    async fn save_user(&self, user: &User) -> Result<(), StoreError>;

    /// Clear both slots atomically.
    async fn clear(&self) -> Result<(), StoreError>;
}

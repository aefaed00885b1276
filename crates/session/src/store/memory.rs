use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use stockdesk_auth::User;

use super::{PersistedSession, SessionStore, StoreError};
use crate::types::Token;

/// Process-local store. Used in tests and for runs that must not touch disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: Mutex<PersistedSession>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds a session, as if left by a previous run.
    pub fn seeded(token: Token, user: User) -> Self {
        Self {
            slots: Mutex::new(PersistedSession {
                token: Some(token),
                user: Some(user),
                stored_at: Some(Utc::now()),
            }),
        }
    }

    /// Copy of the current contents.
    pub fn contents(&self) -> PersistedSession {
        self.slots().clone()
    }

    fn slots(&self) -> MutexGuard<'_, PersistedSession> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self) -> Result<PersistedSession, StoreError> {
        Ok(self.contents())
    }

    async fn save(&self, token: &Token, user: &User) -> Result<(), StoreError> {
        *self.slots() = PersistedSession {
            token: Some(token.clone()),
            user: Some(user.clone()),
            stored_at: Some(Utc::now()),
        };
        Ok(())
    }

    async fn save_user(&self, user: &User) -> Result<(), StoreError> {
        self.slots().user = Some(user.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.slots() = PersistedSession::default();
        Ok(())
    }
}

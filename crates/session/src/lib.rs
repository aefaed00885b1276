//! `stockdesk-session`
//!
//! **Responsibility:** the client-side session of the inventory console.
//!
//! This crate provides:
//! - A [`SessionManager`] that owns the authenticated session and its lifecycle
//! - The [`IdentityGateway`] contract plus an HTTP implementation
//! - A [`SessionStore`] that survives restarts (SQLite) or lives in memory
//!
//! Permission questions are answered by `stockdesk-auth`; the manager just
//! feeds it the current user.

pub mod config;
pub mod error;
pub mod gateway;
pub mod manager;
pub mod state;
pub mod store;
pub mod types;

pub use config::{ConfigError, SessionConfig, UnreachablePolicy};
pub use error::SessionError;
pub use gateway::{GatewayError, IdentityGateway, StatusCategory};
#[cfg(feature = "http")]
pub use gateway::HttpGateway;
pub use manager::SessionManager;
pub use state::{ActiveSession, SessionEvent, SessionPhase, SessionSnapshot, SessionState};
pub use store::{MemoryStore, PersistedSession, SessionStore, StoreError};
#[cfg(feature = "sqlite")]
pub use store::SqliteStore;
pub use types::{Credentials, LoginResponse, PasswordChange, ProfileUpdate, Token};

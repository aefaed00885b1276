//! Session-level error model.
//!
//! Every fallible manager operation returns `Result<_, SessionError>`; the
//! `Display` text is meant to be shown to the user.

use thiserror::Error;

use stockdesk_core::DomainError;

use crate::gateway::GatewayError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("could not persist session: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Invalid(#[from] DomainError),

    #[error("not signed in")]
    NotAuthenticated,

    #[error("session already bootstrapped")]
    AlreadyBootstrapped,

    #[error("another session operation is in progress")]
    Busy,

    #[error("session changed while the request was in flight")]
    Superseded,
}

impl SessionError {
    /// Whether the gateway rejected the session or credentials.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SessionError::Gateway(e) if e.is_unauthorized())
    }
}

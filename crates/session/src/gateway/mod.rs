//! Remote identity gateway contract.
//!
//! The session manager only depends on [`IdentityGateway`]; the transport
//! behind it (HTTP, test stub) is interchangeable.

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "http")]
pub use http::HttpGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use stockdesk_auth::User;

use crate::types::{Credentials, LoginResponse, PasswordChange, ProfileUpdate, Token};

/// Coarse failure class reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCategory {
    /// No response was received.
    Network,
    /// The gateway explicitly rejected the credentials or token.
    Unauthorized,
    /// The request was malformed.
    Validation,
    /// Any other non-success response.
    Server,
}

impl core::fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            StatusCategory::Network => "network",
            StatusCategory::Unauthorized => "unauthorized",
            StatusCategory::Validation => "validation",
            StatusCategory::Server => "server",
        })
    }
}

/// Gateway failure. `Display` is the human-readable message only, so it can be
/// shown to the user as-is.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct GatewayError {
    pub category: StatusCategory,
    pub message: String,
}

impl GatewayError {
    pub fn new(category: StatusCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(StatusCategory::Network, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCategory::Unauthorized, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCategory::Validation, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(StatusCategory::Server, message)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.category == StatusCategory::Unauthorized
    }

    pub fn is_network(&self) -> bool {
        self.category == StatusCategory::Network
    }
}

/// Operations the session core consumes from the identity service.
///
/// Implementations must not retry; a single failure is terminal for the call.
#[async_trait]
pub trait IdentityGateway: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, GatewayError>;

    /// "Who am I" for the given token.
    async fn current_user(&self, token: &Token) -> Result<User, GatewayError>;

    async fn logout(&self, token: &Token) -> Result<(), GatewayError>;

    async fn update_profile(
        &self,
        token: &Token,
        update: &ProfileUpdate,
    ) -> Result<User, GatewayError>;

    async fn change_password(
        &self,
        token: &Token,
        change: &PasswordChange,
    ) -> Result<(), GatewayError>;
}

//! Data exchanged with the identity gateway.
//!
//! Secrets (`Credentials`, `Token`, `PasswordChange`) redact themselves in
//! `Debug` output so they never reach log lines.

use serde::{Deserialize, Serialize};

use stockdesk_auth::User;
use stockdesk_core::{DomainError, DomainResult};

/// Login credentials. Transient: never written to the session store.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub identifier: String,
    secret: String,
}

impl Credentials {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Reject obviously malformed input before any network round trip.
    pub fn validate(&self) -> DomainResult<()> {
        if self.identifier.trim().is_empty() {
            return Err(DomainError::validation("identifier must not be empty"));
        }
        if self.secret.is_empty() {
            return Err(DomainError::validation("secret must not be empty"));
        }
        Ok(())
    }
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credentials")
            .field("identifier", &self.identifier)
            .field("secret", &"***")
            .finish()
    }
}

/// Opaque bearer token issued by the gateway.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token(String);

impl Token {
    pub fn new(raw: impl Into<String>) -> DomainResult<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(DomainError::validation("token must not be empty"));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for Token {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Token(***)")
    }
}

impl TryFrom<String> for Token {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Token> for String {
    fn from(value: Token) -> Self {
        value.0
    }
}

/// Successful login: a fresh token and the user it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub token: Token,
    pub user: User,
}

/// Editable profile fields. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none()
    }
}

#[derive(Clone, Serialize)]
pub struct PasswordChange {
    current_password: String,
    new_password: String,
}

impl PasswordChange {
    pub fn new(current_password: impl Into<String>, new_password: impl Into<String>) -> Self {
        Self {
            current_password: current_password.into(),
            new_password: new_password.into(),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.current_password.is_empty() || self.new_password.is_empty() {
            return Err(DomainError::validation("passwords must not be empty"));
        }
        if self.current_password == self.new_password {
            return Err(DomainError::validation(
                "new password must differ from the current one",
            ));
        }
        Ok(())
    }
}

impl core::fmt::Debug for PasswordChange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("PasswordChange { .. }")
    }
}

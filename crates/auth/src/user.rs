//! User record as returned by the identity gateway.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use stockdesk_core::UserId;

use crate::{Permission, Role};

/// The authenticated actor.
///
/// Role and permissions are authoritative only as last fetched from the
/// gateway. A cached copy is a best-effort mirror, never a source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub role: Role,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl User {
    pub fn new(id: UserId, role: Role) -> Self {
        Self {
            id,
            role,
            permissions: BTreeSet::new(),
            name: None,
            email: None,
        }
    }

    pub fn with_permissions<I, P>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        self.permissions.extend(permissions.into_iter().map(Into::into));
        self
    }

    /// Whether the permission is held directly (no role bypass, no graph).
    pub fn holds(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

use serde::Serialize;
use thiserror::Error;

use crate::{Permission, PermissionGraph, Role, User};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("not signed in")]
    Unauthenticated,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Why a permission check came out the way it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reason {
    /// The user is an admin; every check passes.
    AdminBypass,
    /// The permission is in the user's held set.
    Direct,
    /// A held permission lists the required one in the graph.
    Implied { via: Permission },
    /// There is no signed-in user.
    NoUser,
    /// Neither held nor implied by a single graph edge.
    Missing,
}

impl Reason {
    pub fn is_granted(&self) -> bool {
        matches!(self, Reason::AdminBypass | Reason::Direct | Reason::Implied { .. })
    }
}

fn resolve(user: Option<&User>, permission: &str, graph: &PermissionGraph) -> Reason {
    let Some(user) = user else {
        return Reason::NoUser;
    };

    if user.role.is_admin() {
        return Reason::AdminBypass;
    }

    if user.holds(permission) {
        return Reason::Direct;
    }

    // Single hop only: `held -> permission` must be listed.
    user.permissions
        .iter()
        .find(|held| graph.implies(held.as_str(), permission))
        .map(|held| Reason::Implied { via: held.clone() })
        .unwrap_or(Reason::Missing)
}

/// Whether `user` holds `permission`.
///
/// - No IO
/// - No panics
/// - Admin bypass, then direct hold, then one graph edge
pub fn check(user: Option<&User>, permission: &str, graph: &PermissionGraph) -> bool {
    resolve(user, permission, graph).is_granted()
}

/// True iff `check` passes for at least one permission. Empty input is false.
pub fn check_any<P>(user: Option<&User>, permissions: &[P], graph: &PermissionGraph) -> bool
where
    P: AsRef<str>,
{
    permissions
        .iter()
        .any(|p| check(user, p.as_ref(), graph))
}

/// Strict role equality. Admins do not match other roles.
pub fn check_role(user: Option<&User>, role: Role) -> bool {
    user.is_some_and(|u| u.role == role)
}

/// Guard form of [`check`], for callers that propagate with `?`.
pub fn require(
    user: Option<&User>,
    permission: &str,
    graph: &PermissionGraph,
) -> Result<(), AuthzError> {
    match resolve(user, permission, graph) {
        Reason::NoUser => Err(AuthzError::Unauthenticated),
        Reason::Missing => Err(AuthzError::Forbidden(permission.to_string())),
        _ => Ok(()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorization Explanation (Audit Trail)
// ─────────────────────────────────────────────────────────────────────────────

/// Detailed explanation of a permission check, for logs and debug panels.
#[derive(Debug, Clone, Serialize)]
pub struct Explanation {
    pub required_permission: String,
    pub granted: bool,
    pub reason: Reason,
    pub role: Option<Role>,
    /// Held permissions, sorted.
    pub held_permissions: Vec<String>,
}

impl core::fmt::Display for Explanation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let required = &self.required_permission;
        match &self.reason {
            Reason::AdminBypass => write!(f, "'{required}' granted: admin role bypasses checks"),
            Reason::Direct => write!(f, "'{required}' granted: held directly"),
            Reason::Implied { via } => write!(f, "'{required}' granted: implied by '{via}'"),
            Reason::NoUser => write!(f, "'{required}' denied: not signed in"),
            Reason::Missing => write!(
                f,
                "'{required}' denied: not held or implied. Current permissions: {:?}",
                self.held_permissions
            ),
        }
    }
}

/// Explain why a check would be granted or denied.
pub fn explain(user: Option<&User>, permission: &str, graph: &PermissionGraph) -> Explanation {
    let reason = resolve(user, permission, graph);

    Explanation {
        required_permission: permission.to_string(),
        granted: reason.is_granted(),
        reason,
        role: user.map(|u| u.role),
        held_permissions: user
            .map(|u| u.permissions.iter().map(|p| p.as_str().to_string()).collect())
            .unwrap_or_default(),
    }
}

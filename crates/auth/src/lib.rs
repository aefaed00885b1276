//! `stockdesk-auth`: pure permission resolution for the inventory console.
//!
//! This crate is intentionally decoupled from HTTP, storage and async.
//! Everything here is a function of a [`User`] record and an immutable
//! [`PermissionGraph`].

pub mod authorize;
pub mod graph;
pub mod permissions;
pub mod roles;
pub mod user;

pub use authorize::{check, check_any, check_role, explain, require, AuthzError, Explanation, Reason};
pub use graph::PermissionGraph;
pub use permissions::Permission;
pub use roles::Role;
pub use user::User;

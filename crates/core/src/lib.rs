//! `stockdesk-core`: primitives shared by the auth and session crates.
//!
//! This crate contains **pure** building blocks (no I/O, no async).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::UserId;

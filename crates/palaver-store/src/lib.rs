//! # palaver-store
//!
//! Durable message storage for palaver, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every operation
//! the delivery core needs: message CRUD with soft-delete and seen state,
//! conversation-scoped cursor pagination, best-effort presence rows, and
//! the group-membership lookups fanout relies on.

pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod presence;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;

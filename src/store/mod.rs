//! Catalog persistence. Query functions take a [`rusqlite::Connection`] so
//! they run unchanged inside a [`Session`] or on an autocommit connection.

pub mod archiver;
pub mod cascade;
pub mod consistency;
pub mod keys;
pub mod lfs;
pub mod mirror;
pub mod notice;
pub mod repo;
mod schema;
mod session;
pub mod social;
mod sqlite;
pub mod user;

pub use session::Session;
pub use sqlite::{SqliteStore, is_unique_violation};

/// Current time as unix seconds.
pub fn timestamp_now() -> i64 {
    chrono::Utc::now().timestamp()
}

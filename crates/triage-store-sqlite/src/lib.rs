//! SQLite backend for the triage model store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Descriptors, status transitions, and
//! ledger entries are append-only; triggers reject any UPDATE or DELETE.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;

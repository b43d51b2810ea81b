//! SQLite backend for the registration store.
//!
//! Rows are kept schema-less, as JSON objects in a single `items` table keyed
//! by `(table_name, item_key)`, so the data-access layer sees the same drift
//! it would see in any key-value store. Access goes through
//! [`tokio_rusqlite`] so queries run off the async runtime.

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

//! SQL schema for the SQLite item store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per stored item. `body` is the item itself as a JSON object and
-- carries no fixed columns; listings are returned in rowid (insertion) order.
CREATE TABLE IF NOT EXISTS items (
    table_name TEXT NOT NULL,   -- logical table, e.g. 'people'
    item_key   TEXT NOT NULL,   -- value of the table's key attribute
    body       TEXT NOT NULL,
    PRIMARY KEY (table_name, item_key)
);

PRAGMA user_version = 1;
";

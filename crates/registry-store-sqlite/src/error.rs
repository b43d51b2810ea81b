//! Error type for `registry-store-sqlite`.

use std::time::Duration;

use registry_core::store::{FailureKind, StoreFailure, Table};
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A `Create` put found the key already taken.
  #[error("{table}/{key} already exists")]
  ConditionFailed { table: Table, key: String },

  #[error("{table} item has no usable {attribute:?} key attribute")]
  MissingKey {
    table:     Table,
    attribute: &'static str,
  },

  #[error("{table}/{key} body is not a JSON object")]
  CorruptItem { table: Table, key: String },

  #[error("{operation} timed out after {after:?}")]
  Timeout {
    operation: &'static str,
    after:     Duration,
  },
}

impl StoreFailure for Error {
  fn kind(&self) -> FailureKind {
    match self {
      Self::ConditionFailed { .. } => FailureKind::ConditionFailed,
      Self::Timeout { .. } => FailureKind::Transient,
      Self::Database(tokio_rusqlite::Error::ConnectionClosed) => FailureKind::Transient,
      Self::Database(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(
        e,
        _,
      ))) if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
        FailureKind::Transient
      }
      _ => FailureKind::Other,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

//! Error types for `registry-core`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boxed backend error carried inside [`Error::Transient`] and
/// [`Error::Unexpected`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The logical entity an error (or a stored row) refers to.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
  Person,
  Project,
  Subscription,
  AuditEvent,
  Lockout,
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("{entity} not found: {id}")]
  NotFound { entity: EntityKind, id: String },

  /// Primary-key collision on create, or a business-uniqueness violation.
  #[error("{entity} conflict: {detail}")]
  Conflict { entity: EntityKind, detail: String },

  #[error("validation failed: {0}")]
  Validation(String),

  /// A stored row lacks a field the canonical model cannot do without.
  #[error("{entity} record is missing mandatory field {field:?}")]
  MissingField {
    entity: EntityKind,
    field:  &'static str,
  },

  /// Network, throttling, timeout, or lock contention; safe to retry.
  #[error("transient store failure during {entity}.{operation}: {source}")]
  Transient {
    entity:    EntityKind,
    operation: &'static str,
    #[source]
    source:    BoxError,
  },

  #[error("unexpected failure during {entity}.{operation}: {source}")]
  Unexpected {
    entity:    EntityKind,
    operation: &'static str,
    #[source]
    source:    BoxError,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub fn not_found(entity: EntityKind, id: impl Into<String>) -> Self {
    Self::NotFound { entity, id: id.into() }
  }

  pub fn conflict(entity: EntityKind, detail: impl Into<String>) -> Self {
    Self::Conflict { entity, detail: detail.into() }
  }

  /// Whether the caller may retry the same operation unchanged.
  pub fn is_retryable(&self) -> bool { matches!(self, Self::Transient { .. }) }

  /// Whether the error is actionable by the client that made the request.
  pub fn is_client_error(&self) -> bool {
    matches!(
      self,
      Self::NotFound { .. } | Self::Conflict { .. } | Self::Validation(_)
    )
  }

  /// The message an outer layer may show to an end user. Store and internal
  /// failures collapse to a generic retryable message.
  pub fn user_message(&self) -> String {
    match self {
      Self::Conflict {
        entity: EntityKind::Subscription,
        ..
      } => "already subscribed to this project".to_owned(),
      Self::NotFound { .. } | Self::Conflict { .. } | Self::Validation(_) => {
        self.to_string()
      }
      _ => "the request could not be completed, please try again".to_owned(),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn subscription_conflict_reads_as_already_subscribed() {
    let err = Error::conflict(EntityKind::Subscription, "pair exists");
    assert!(err.is_client_error());
    assert_eq!(err.user_message(), "already subscribed to this project");
  }

  #[test]
  fn store_failures_do_not_leak_detail() {
    let err = Error::Unexpected {
      entity:    EntityKind::Person,
      operation: "update",
      source:    "disk on fire".into(),
    };
    assert!(!err.is_retryable());
    assert!(!err.user_message().contains("disk"));

    let err = Error::Transient {
      entity:    EntityKind::Person,
      operation: "get",
      source:    "busy".into(),
    };
    assert!(err.is_retryable());
  }
}

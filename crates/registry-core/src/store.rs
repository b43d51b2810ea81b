//! The `ItemStore` trait: the contract a schema-less key-value backend must
//! honour for the data-access layer.
//!
//! Backends know nothing about entities. They store JSON objects keyed by
//! `(table, key)`, apply [`UpdateInstruction`]s, and classify their own
//! failures through [`StoreFailure`] so the repositories can map them to the
//! crate's error taxonomy.

use std::future::Future;

use serde_json::Value;

use crate::{normalize::Field, update::UpdateInstruction};

/// One schema-less row.
pub type Item = serde_json::Map<String, Value>;

// ─── Tables ──────────────────────────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum Table {
  People,
  Projects,
  Subscriptions,
  AuditLogs,
  AccountLockouts,
}

impl Table {
  /// The attribute holding the primary key inside each row.
  pub fn key_attribute(self) -> &'static str {
    match self {
      Self::AccountLockouts => "personId",
      _ => "id",
    }
  }
}

/// A fully-qualified row address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
  pub table: Table,
  pub key:   String,
}

impl ItemKey {
  pub fn new(table: Table, key: impl Into<String>) -> Self {
    Self { table, key: key.into() }
  }
}

// ─── Queries ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Match {
  Exact,
  /// Trimmed, case-insensitive comparison.
  IgnoreCase,
}

/// An alias-aware equality filter: a row matches when the first present
/// spelling of `field` equals `value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
  pub field: Field,
  pub value: String,
  pub mode:  Match,
}

impl Filter {
  pub fn eq(field: Field, value: impl Into<String>) -> Self {
    Self { field, value: value.into(), mode: Match::Exact }
  }

  pub fn eq_ignore_case(field: Field, value: impl Into<String>) -> Self {
    Self { field, value: value.into(), mode: Match::IgnoreCase }
  }

  /// In-process evaluation, for backends without server-side filtering.
  pub fn matches(&self, item: &Item) -> bool {
    let stored = match self.field.resolve(item) {
      Some(Value::String(s)) => s.clone(),
      Some(Value::Number(n)) => n.to_string(),
      Some(Value::Bool(b)) => b.to_string(),
      _ => return false,
    };
    match self.mode {
      Match::Exact => stored == self.value,
      Match::IgnoreCase => {
        stored.trim().eq_ignore_ascii_case(self.value.trim())
      }
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
  /// Fail with [`FailureKind::ConditionFailed`] if the key exists.
  Create,
  /// Overwrite whatever is stored under the key.
  Replace,
}

// ─── Failures ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
  /// A conditional write found its precondition violated.
  ConditionFailed,
  /// Timeout, throttling, lock contention, or a dropped connection.
  Transient,
  Other,
}

pub trait StoreFailure: std::error::Error + Send + Sync + 'static {
  fn kind(&self) -> FailureKind;
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over the key-value backend.
///
/// All methods return `Send` futures so the trait can be used from
/// multi-threaded runtimes. Listing order is backend-defined but must be
/// stable between calls on an unchanged table.
pub trait ItemStore: Send + Sync {
  type Error: StoreFailure;

  /// Store `item` under the key found in its
  /// [`key_attribute`](Table::key_attribute).
  fn put_item(
    &self,
    table: Table,
    item: Item,
    mode: PutMode,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn get_item(
    &self,
    table: Table,
    key: String,
  ) -> impl Future<Output = Result<Option<Item>, Self::Error>> + Send + '_;

  /// Apply `instruction` to an existing row and return the row afterwards.
  /// Returns `None`, writing nothing, when the key does not exist.
  fn update_item(
    &self,
    table: Table,
    key: String,
    instruction: UpdateInstruction,
  ) -> impl Future<Output = Result<Option<Item>, Self::Error>> + Send + '_;

  /// Returns whether a row was removed.
  fn delete_item(
    &self,
    table: Table,
    key: String,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// Every row matching all `filters`, up to `limit`.
  fn scan(
    &self,
    table: Table,
    filters: Vec<Filter>,
    limit: Option<usize>,
  ) -> impl Future<Output = Result<Vec<Item>, Self::Error>> + Send + '_;

  /// Delete all `keys` in one all-or-nothing transaction.
  ///
  /// Returns `Ok(false)`, having deleted nothing, when the backend has no
  /// multi-row transactions.
  fn delete_atomically(
    &self,
    keys: Vec<ItemKey>,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  const PERSON_ID: Field = Field::new("personId", &["person_id"]);
  const EMAIL: Field = Field::plain("email");

  fn item(v: Value) -> Item { v.as_object().cloned().unwrap() }

  #[test]
  fn filters_follow_aliases() {
    let f = Filter::eq(PERSON_ID, "p1");
    assert!(f.matches(&item(json!({ "person_id": "p1" }))));
    assert!(f.matches(&item(json!({ "personId": "p1", "person_id": "p9" }))));
    assert!(!f.matches(&item(json!({ "personId": "p2", "person_id": "p1" }))));
    assert!(!f.matches(&item(json!({}))));
  }

  #[test]
  fn case_insensitive_filter_trims() {
    let f = Filter::eq_ignore_case(EMAIL, " Ana@Example.org");
    assert!(f.matches(&item(json!({ "email": "ana@example.ORG " }))));
    assert!(!Filter::eq(EMAIL, "ANA@example.org")
      .matches(&item(json!({ "email": "ana@example.org" }))));
  }

  #[test]
  fn lockouts_are_keyed_by_person() {
    assert_eq!(Table::AccountLockouts.key_attribute(), "personId");
    assert_eq!(Table::People.key_attribute(), "id");
    assert_eq!(Table::AuditLogs.as_ref(), "audit_logs");
  }
}

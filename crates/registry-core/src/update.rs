//! Safe update-instruction building.
//!
//! A [`Changes`] set names canonical [`Field`]s and the values to store under
//! them. [`UpdateInstruction::build`] turns it into a parameterised
//! `SET … REMOVE …` instruction: values are always placeholders, reserved
//! attribute names are escaped, `updatedAt` is stamped, and every legacy
//! spelling of a touched field is removed so rows converge on the canonical
//! convention as they are written.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::{
  coerce::{TimeValue, enum_string, format_date, timestamp_string},
  normalize::{Field, UPDATED_AT},
  store::Item,
};

/// Attribute names the backend's expression grammar reserves. Compared
/// case-insensitively.
const RESERVED_WORDS: &[&str] = &[
  "name", "status", "location", "size", "type", "date", "time", "timestamp",
  "user", "data", "value", "count", "comment", "role", "level", "action",
];

pub fn is_reserved(attribute: &str) -> bool {
  RESERVED_WORDS.iter().any(|w| w.eq_ignore_ascii_case(attribute))
}

// ─── Changes ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Change {
  Set(Value),
  Remove,
}

/// An ordered set of field changes. Setting the same field twice keeps the
/// last value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
  entries: Vec<(Field, Change)>,
}

impl Changes {
  pub fn new() -> Self { Self::default() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn set(self, field: Field, value: impl Into<Value>) -> Self {
    self.push(field, Change::Set(value.into()))
  }

  pub fn set_opt<T: Into<Value>>(self, field: Field, value: Option<T>) -> Self {
    match value {
      Some(v) => self.set(field, v),
      None => self,
    }
  }

  pub fn set_enum(self, field: Field, value: impl AsRef<str>) -> Self {
    self.set(field, enum_string(value))
  }

  pub fn set_timestamp<'a>(self, field: Field, value: impl Into<TimeValue<'a>>) -> Self {
    self.set(field, timestamp_string(Some(value.into()), ""))
  }

  pub fn set_date(self, field: Field, value: NaiveDate) -> Self {
    self.set(field, format_date(value))
  }

  /// Replace a nested object wholesale.
  pub fn set_object(self, field: Field, value: Item) -> Self {
    self.set(field, Value::Object(value))
  }

  /// Remove the field entirely, including its legacy spellings.
  pub fn remove(self, field: Field) -> Self { self.push(field, Change::Remove) }

  /// Whether `field` is touched by this set.
  pub fn touches(&self, field: &Field) -> bool {
    self.entries.iter().any(|(f, _)| f.key == field.key)
  }

  /// The value a field will be set to, if it is being set.
  pub fn value_of(&self, field: &Field) -> Option<&Value> {
    self.entries.iter().find_map(|(f, c)| match c {
      Change::Set(v) if f.key == field.key => Some(v),
      _ => None,
    })
  }

  fn push(mut self, field: Field, change: Change) -> Self {
    match self.entries.iter_mut().find(|(f, _)| f.key == field.key) {
      Some(slot) => *slot = (field, change),
      None => self.entries.push((field, change)),
    }
    self
  }
}

// ─── Instruction ─────────────────────────────────────────────────────────────

/// One `target = :placeholder` assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetClause {
  /// The attribute name, or its `#` placeholder when reserved.
  pub target:      String,
  pub placeholder: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateInstruction {
  set:    Vec<SetClause>,
  remove: Vec<String>,
  values: BTreeMap<String, Value>,
  names:  BTreeMap<String, String>,
}

impl UpdateInstruction {
  /// Build an instruction stamped with the current time.
  pub fn build(changes: &Changes) -> Self { Self::build_at(changes, Utc::now()) }

  pub fn build_at(changes: &Changes, now: DateTime<Utc>) -> Self {
    let mut out = Self {
      set:    Vec::new(),
      remove: Vec::new(),
      values: BTreeMap::new(),
      names:  BTreeMap::new(),
    };

    for (field, change) in &changes.entries {
      if field.key == UPDATED_AT.key {
        continue;
      }
      match change {
        Change::Set(value) => out.push_set(field.key, value.clone()),
        Change::Remove => out.push_remove(field.key),
      }
      for alias in field.legacy {
        out.push_remove(alias);
      }
    }

    out.push_set(UPDATED_AT.key, Value::from(timestamp_string(Some(now.into()), "")));
    for alias in UPDATED_AT.legacy {
      out.push_remove(alias);
    }
    out
  }

  fn target(&mut self, attribute: &str) -> String {
    if is_reserved(attribute) {
      let placeholder = format!("#{attribute}");
      self.names.insert(placeholder.clone(), attribute.to_owned());
      placeholder
    } else {
      attribute.to_owned()
    }
  }

  fn push_set(&mut self, attribute: &str, value: Value) {
    let target = self.target(attribute);
    let placeholder = if attribute == UPDATED_AT.key {
      ":updated_at".to_owned()
    } else {
      format!(":{attribute}")
    };
    self.values.insert(placeholder.clone(), value);
    self.set.push(SetClause { target, placeholder });
  }

  fn push_remove(&mut self, attribute: &str) {
    let target = self.target(attribute);
    if !self.remove.contains(&target) {
      self.remove.push(target);
    }
  }

  pub fn set_clauses(&self) -> &[SetClause] { &self.set }

  pub fn remove_clauses(&self) -> &[String] { &self.remove }

  pub fn values(&self) -> &BTreeMap<String, Value> { &self.values }

  pub fn names(&self) -> &BTreeMap<String, String> { &self.names }

  /// The textual `SET a = :a, #b = :b REMOVE c` form.
  pub fn expression(&self) -> String {
    let assignments = self
      .set
      .iter()
      .map(|c| format!("{} = {}", c.target, c.placeholder))
      .collect::<Vec<_>>()
      .join(", ");
    let mut expr = format!("SET {assignments}");
    if !self.remove.is_empty() {
      expr.push_str(" REMOVE ");
      expr.push_str(&self.remove.join(", "));
    }
    expr
  }

  fn resolve_name<'a>(&'a self, target: &'a str) -> &'a str {
    self.names.get(target).map(String::as_str).unwrap_or(target)
  }

  /// `(attribute, value)` pairs with placeholders resolved, for backends
  /// that apply the instruction themselves.
  pub fn assignments(&self) -> impl Iterator<Item = (&str, &Value)> + '_ {
    self.set.iter().filter_map(|c| {
      let value = self.values.get(&c.placeholder)?;
      Some((self.resolve_name(&c.target), value))
    })
  }

  /// Attribute names to delete, placeholders resolved.
  pub fn removals(&self) -> impl Iterator<Item = &str> + '_ {
    self.remove.iter().map(|t| self.resolve_name(t))
  }

  /// Apply the instruction to an in-memory row.
  pub fn apply_to(&self, item: &mut Item) {
    for attribute in self.removals() {
      item.remove(attribute);
    }
    for (attribute, value) in self.assignments() {
      item.insert(attribute.to_owned(), value.clone());
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use serde_json::json;

  use super::*;

  const STATUS: Field = Field::plain("status");
  const PERSON_ID: Field = Field::new("personId", &["person_id"]);
  const NAME: Field = Field::new("name", &["project_name", "title"]);

  fn at() -> DateTime<Utc> { Utc.with_ymd_and_hms(2025, 8, 5, 1, 0, 0).unwrap() }

  #[test]
  fn empty_changes_only_stamp_updated_at() {
    let ins = UpdateInstruction::build_at(&Changes::new(), at());
    assert_eq!(ins.expression(), "SET updatedAt = :updated_at REMOVE updated_at");
    assert_eq!(ins.values().len(), 1);
    assert_eq!(ins.values()[":updated_at"], json!("2025-08-05T01:00:00Z"));
    assert!(ins.names().is_empty());
  }

  #[test]
  fn reserved_words_are_escaped_case_insensitively() {
    let changes = Changes::new()
      .set_enum(STATUS, "active")
      .set(Field::plain("Type"), "x");
    let ins = UpdateInstruction::build_at(&changes, at());
    assert_eq!(ins.names()["#status"], "status");
    assert_eq!(ins.names()["#Type"], "Type");
    assert!(ins.expression().starts_with("SET #status = :status, #Type = :Type"));
    assert_eq!(ins.values()[":status"], json!("active"));
  }

  #[test]
  fn touched_fields_shed_legacy_spellings() {
    let changes = Changes::new().set(PERSON_ID, "p1").set(NAME, "Dig");
    let ins = UpdateInstruction::build_at(&changes, at());
    let removed: Vec<_> = ins.removals().collect();
    assert_eq!(removed, ["person_id", "project_name", "title", "updated_at"]);
  }

  #[test]
  fn explicit_updated_at_is_ignored() {
    let changes = Changes::new().set(UPDATED_AT, "1999-01-01T00:00:00Z");
    let ins = UpdateInstruction::build_at(&changes, at());
    assert_eq!(ins.set_clauses().len(), 1);
    assert_eq!(ins.values()[":updated_at"], json!("2025-08-05T01:00:00Z"));
  }

  #[test]
  fn later_set_wins() {
    let changes = Changes::new().set(STATUS, "pending").set(STATUS, "active");
    assert_eq!(changes.len(), 1);
    assert_eq!(changes.value_of(&STATUS), Some(&json!("active")));
  }

  #[test]
  fn applying_converges_on_canonical_keys() {
    let mut row = json!({
      "id": "s1",
      "person_id": "p1",
      "status": "pending",
      "updated_at": "2020-01-01T00:00:00",
    })
    .as_object()
    .cloned()
    .unwrap();
    let changes = Changes::new().set(PERSON_ID, "p1").set_enum(STATUS, "active");
    UpdateInstruction::build_at(&changes, at()).apply_to(&mut row);
    assert_eq!(
      Value::Object(row),
      json!({
        "id": "s1",
        "personId": "p1",
        "status": "active",
        "updatedAt": "2025-08-05T01:00:00Z",
      })
    );
  }

  #[test]
  fn removal_drops_canonical_and_legacy() {
    let ins = UpdateInstruction::build_at(&Changes::new().remove(PERSON_ID), at());
    assert_eq!(
      ins.expression(),
      "SET updatedAt = :updated_at REMOVE personId, person_id, updated_at"
    );
  }
}

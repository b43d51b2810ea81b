//! Encoding helpers between items and the `items` table, and the SQL built
//! for alias-aware scans.

use registry_core::store::{Filter, Item, Match, Table};
use serde_json::Value;

use crate::{Error, Result};

// ─── Bodies ──────────────────────────────────────────────────────────────────

pub fn encode_body(item: &Item) -> Result<String> { Ok(serde_json::to_string(item)?) }

pub fn decode_body(table: Table, key: &str, raw: &str) -> Result<Item> {
  match serde_json::from_str::<Value>(raw)? {
    Value::Object(map) => Ok(map),
    _ => Err(Error::CorruptItem { table, key: key.to_owned() }),
  }
}

/// The primary key an item will be stored under.
pub fn item_key(table: Table, item: &Item) -> Result<String> {
  let attribute = table.key_attribute();
  match item.get(attribute) {
    Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
    Some(Value::Number(n)) => Ok(n.to_string()),
    _ => Err(Error::MissingKey { table, attribute }),
  }
}

fn json_path(attribute: &str) -> String {
  format!("$.\"{}\"", attribute.replace('"', ""))
}

// ─── Scans ───────────────────────────────────────────────────────────────────

/// A scan statement plus its positional parameters, in order.
#[derive(Debug, PartialEq, Eq)]
pub struct ScanQuery {
  pub sql:    String,
  pub params: Vec<String>,
}

/// Build the scan for `filters`. Each filter compares the first non-null
/// spelling of its field, mirroring [`Filter::matches`].
pub fn scan_query(table: Table, filters: &[Filter], limit: Option<usize>) -> ScanQuery {
  let mut params = vec![table.to_string()];
  let mut sql = String::from("SELECT item_key, body FROM items WHERE table_name = ?1");

  for filter in filters {
    let extracts = filter
      .field
      .names()
      .map(|name| {
        params.push(json_path(name));
        format!("json_extract(body, ?{})", params.len())
      })
      .collect::<Vec<_>>();
    // SQLite's coalesce() wants at least two arguments.
    let stored = match extracts.as_slice() {
      [only] => format!("CAST({only} AS TEXT)"),
      many => format!("CAST(COALESCE({}) AS TEXT)", many.join(", ")),
    };

    match filter.mode {
      Match::Exact => {
        params.push(filter.value.clone());
        sql.push_str(&format!(" AND {stored} = ?{}", params.len()));
      }
      Match::IgnoreCase => {
        params.push(filter.value.trim().to_ascii_lowercase());
        sql.push_str(&format!(" AND lower(trim({stored})) = ?{}", params.len()));
      }
    }
  }

  sql.push_str(" ORDER BY rowid");
  if let Some(limit) = limit {
    sql.push_str(&format!(" LIMIT {limit}"));
  }
  ScanQuery { sql, params }
}

#[cfg(test)]
mod tests {
  use registry_core::normalize::Field;

  use super::*;

  #[test]
  fn scan_without_filters() {
    let q = scan_query(Table::People, &[], Some(5));
    assert_eq!(
      q.sql,
      "SELECT item_key, body FROM items WHERE table_name = ?1 ORDER BY rowid LIMIT 5"
    );
    assert_eq!(q.params, vec!["people"]);
  }

  #[test]
  fn filters_coalesce_every_alias() {
    let field = Field::new("personId", &["person_id"]);
    let q = scan_query(Table::Subscriptions, &[Filter::eq(field, "p1")], None);
    assert!(q.sql.contains(
      "CAST(COALESCE(json_extract(body, ?2), json_extract(body, ?3)) AS TEXT) = ?4"
    ));
    assert_eq!(q.params, vec!["subscriptions", "$.\"personId\"", "$.\"person_id\"", "p1"]);
  }

  #[test]
  fn keys_come_from_the_tables_key_attribute() {
    let item = serde_json::json!({ "personId": "p1", "id": "x" });
    let item = item.as_object().unwrap();
    assert_eq!(item_key(Table::AccountLockouts, item).unwrap(), "p1");
    assert_eq!(item_key(Table::People, item).unwrap(), "x");
    assert!(matches!(
      item_key(Table::Projects, &Item::new()),
      Err(Error::MissingKey { attribute: "id", .. })
    ));
  }
}

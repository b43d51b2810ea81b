//! Canonical field tables and the reader/writer pair that sits between raw
//! rows and typed records.
//!
//! Every attribute the data-access layer knows about is declared once as a
//! [`Field`]: the canonical (camelCase) key it is written under, plus the
//! legacy spellings older writers used. Reads resolve through the whole list;
//! writes only ever produce the canonical key.

use std::{borrow::Cow, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::{
  coerce::{format_date, format_timestamp, parse_date, timestamp_from_value},
  error::{EntityKind, Error, Result},
  store::{Item, Table},
};

// ─── Fields ──────────────────────────────────────────────────────────────────

/// One logical attribute and every name it has been stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Field {
  /// The key every write uses.
  pub key:    &'static str,
  /// Older spellings, newest first. Read but never written.
  pub legacy: &'static [&'static str],
}

impl Field {
  pub const fn new(key: &'static str, legacy: &'static [&'static str]) -> Self {
    Self { key, legacy }
  }

  pub const fn plain(key: &'static str) -> Self { Self { key, legacy: &[] } }

  /// The canonical key followed by every legacy alias, in priority order.
  pub fn names(&self) -> impl Iterator<Item = &'static str> + use<> {
    let legacy = self.legacy;
    std::iter::once(self.key).chain(legacy.iter().copied())
  }

  /// The first present, non-null value among the field's names.
  pub fn resolve<'a>(&self, item: &'a Item) -> Option<&'a Value> {
    self
      .names()
      .filter_map(|name| item.get(name))
      .find(|v| !v.is_null())
  }

  /// Drop every legacy spelling from `item`, leaving the canonical key alone.
  pub fn strip_legacy(&self, item: &mut Item) {
    for name in self.legacy {
      item.remove(*name);
    }
  }
}

/// Stamped on every write; shared by all entities.
pub const UPDATED_AT: Field = Field::new("updatedAt", &["updated_at"]);
pub const CREATED_AT: Field = Field::new("createdAt", &["created_at"]);

// ─── Records ─────────────────────────────────────────────────────────────────

/// A typed entity with a canonical stored form.
///
/// `from_item` must accept any historical row shape: it fails only when a
/// mandatory identifying field is missing. `to_item` always writes the
/// canonical convention.
pub trait Record: Sized + Send + Sync + 'static {
  const ENTITY: EntityKind;
  const TABLE: Table;

  fn key(&self) -> &str;
  fn from_item(item: &Item) -> Result<Self>;
  fn to_item(&self) -> Item;
}

// ─── Reading ─────────────────────────────────────────────────────────────────

/// Reads typed values out of one raw row, substituting documented defaults
/// for anything missing or malformed.
pub struct ItemReader<'a> {
  entity: EntityKind,
  item:   &'a Item,
}

impl<'a> ItemReader<'a> {
  pub fn new(entity: EntityKind, item: &'a Item) -> Self { Self { entity, item } }

  pub fn raw(&self, field: &Field) -> Option<&'a Value> { field.resolve(self.item) }

  /// A mandatory identifying string. Empty counts as missing.
  pub fn required(&self, field: &Field) -> Result<String> {
    self.opt_string(field).ok_or(Error::MissingField {
      entity: self.entity,
      field:  field.key,
    })
  }

  /// A free-text attribute; absent reads as the empty string.
  pub fn string(&self, field: &Field) -> String {
    self.opt_string(field).unwrap_or_default()
  }

  pub fn opt_string(&self, field: &Field) -> Option<String> {
    let s = match self.raw(field)? {
      Value::String(s) => s.clone(),
      Value::Number(n) => n.to_string(),
      Value::Bool(b) => b.to_string(),
      other => {
        self.malformed(field, other, "string");
        return None;
      }
    };
    (!s.is_empty()).then_some(s)
  }

  pub fn bool(&self, field: &Field, default: bool) -> bool {
    match self.raw(field) {
      None => default,
      Some(Value::Bool(b)) => *b,
      Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
      Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => {
          self.malformed(field, &Value::String(s.clone()), "bool");
          default
        }
      },
      Some(other) => {
        self.malformed(field, other, "bool");
        default
      }
    }
  }

  pub fn count(&self, field: &Field, default: u32) -> u32 {
    let parsed = match self.raw(field) {
      None => return default,
      Some(Value::Number(n)) => n
        .as_u64()
        .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
      Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
      Some(_) => None,
    };
    match parsed.and_then(|n| u32::try_from(n).ok()) {
      Some(n) => n,
      None => {
        if let Some(v) = self.raw(field) {
          self.malformed(field, v, "count");
        }
        default
      }
    }
  }

  pub fn timestamp(&self, field: &Field) -> Option<DateTime<Utc>> {
    timestamp_from_value(self.raw(field))
  }

  pub fn date(&self, field: &Field) -> Option<NaiveDate> {
    match self.raw(field)? {
      Value::String(s) => parse_date(Some(s)),
      other => {
        self.malformed(field, other, "date");
        None
      }
    }
  }

  pub fn object(&self, field: &Field) -> Option<&'a Item> {
    match self.raw(field)? {
      Value::Object(map) => Some(map),
      other => {
        self.malformed(field, other, "object");
        None
      }
    }
  }

  pub fn strings(&self, field: &Field) -> Vec<String> {
    match self.raw(field) {
      None => Vec::new(),
      Some(Value::Array(values)) => values
        .iter()
        .filter_map(|v| v.as_str().map(str::to_owned))
        .collect(),
      Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
      Some(other) => {
        self.malformed(field, other, "list");
        Vec::new()
      }
    }
  }

  /// An enumeration stored as a string. Unknown values fall back to
  /// `default` with a warning.
  pub fn enumeration<E: FromStr>(&self, field: &Field, default: E) -> E {
    let Some(raw) = self.opt_string(field) else {
      return default;
    };
    match raw.trim().parse() {
      Ok(v) => v,
      Err(_) => {
        tracing::warn!(
          entity = %self.entity,
          field = field.key,
          value = %raw,
          "unknown enumeration value, substituting default"
        );
        default
      }
    }
  }

  fn malformed(&self, field: &Field, value: &Value, expected: &str) {
    tracing::warn!(
      entity = %self.entity,
      field = field.key,
      expected,
      value = %value,
      "malformed attribute, substituting default"
    );
  }
}

// ─── Writing ─────────────────────────────────────────────────────────────────

/// Builds a canonical row. Absent optionals are omitted rather than nulled.
#[derive(Debug, Default)]
pub struct ItemWriter {
  item: Item,
}

impl ItemWriter {
  pub fn new() -> Self { Self::default() }

  pub fn set(mut self, field: &Field, value: impl Into<Value>) -> Self {
    self.item.insert(field.key.to_owned(), value.into());
    self
  }

  pub fn set_opt<T: Into<Value>>(self, field: &Field, value: Option<T>) -> Self {
    match value {
      Some(v) => self.set(field, v),
      None => self,
    }
  }

  pub fn timestamp(self, field: &Field, value: DateTime<Utc>) -> Self {
    self.set(field, format_timestamp(value))
  }

  pub fn opt_timestamp(self, field: &Field, value: Option<DateTime<Utc>>) -> Self {
    self.set_opt(field, value.map(format_timestamp))
  }

  pub fn opt_date(self, field: &Field, value: Option<NaiveDate>) -> Self {
    self.set_opt(field, value.map(format_date))
  }

  pub fn finish(self) -> Item { self.item }
}

// ─── Email ───────────────────────────────────────────────────────────────────

/// Substituted when a stored address has no usable local part.
pub const UNKNOWN_EMAIL: &str = "unknown@example.com";

/// Substituted for reserved or unroutable domains.
pub const SAFE_EMAIL_DOMAIN: &str = "example.com";

const RESERVED_DOMAIN_SUFFIXES: &[&str] =
  &[".local", ".localhost", ".internal", ".invalid", ".test"];

/// Make a stored email address presentable without ever failing the read.
///
/// Addresses with a reserved or dotless domain keep their local part under
/// [`SAFE_EMAIL_DOMAIN`]; anything without a local part becomes
/// [`UNKNOWN_EMAIL`]. Empty stays empty.
pub fn sanitize_email(raw: &str) -> Cow<'_, str> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return Cow::Borrowed("");
  }

  let Some((local, domain)) = trimmed.rsplit_once('@') else {
    tracing::warn!(email = raw, "stored email has no domain, substituting");
    return Cow::Borrowed(UNKNOWN_EMAIL);
  };
  if local.is_empty() {
    tracing::warn!(email = raw, "stored email has no local part, substituting");
    return Cow::Borrowed(UNKNOWN_EMAIL);
  }

  let lowered = domain.to_ascii_lowercase();
  let reserved = !lowered.contains('.')
    || RESERVED_DOMAIN_SUFFIXES.iter().any(|s| lowered.ends_with(s));
  if reserved {
    tracing::warn!(email = raw, "stored email uses a reserved domain");
    return Cow::Owned(format!("{local}@{SAFE_EMAIL_DOMAIN}"));
  }

  if trimmed.len() == raw.len() {
    Cow::Borrowed(raw)
  } else {
    Cow::Owned(trimmed.to_owned())
  }
}

/// Lowercased, trimmed form used for lookups.
pub fn email_lookup_key(email: &str) -> String { email.trim().to_ascii_lowercase() }

// ─── Logging ─────────────────────────────────────────────────────────────────

const REDACTED: &str = "[redacted]";
const SENSITIVE_MARKERS: &[&str] = &["password", "salt", "secret", "token"];

/// A copy of `item` safe to put in a log line: credential-like attributes
/// are replaced at any depth.
pub fn sanitize_for_logging(item: &Item) -> Value {
  Value::Object(
    item
      .iter()
      .map(|(k, v)| {
        let lowered = k.to_ascii_lowercase();
        let value = if SENSITIVE_MARKERS.iter().any(|m| lowered.contains(m)) {
          Value::from(REDACTED)
        } else {
          match v {
            Value::Object(inner) => sanitize_for_logging(inner),
            other => other.clone(),
          }
        };
        (k.clone(), value)
      })
      .collect(),
  )
}

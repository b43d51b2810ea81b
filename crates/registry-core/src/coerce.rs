//! Shape-tolerant conversions between stored primitives and typed values.
//!
//! A value crossing the store boundary may have been written by any of
//! several historical code paths, so none of these functions assume an input
//! shape and none of them fail: unparseable input degrades to `None` (or the
//! caller's default) with a `warn!` line.

use chrono::{
  DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc,
};
use serde_json::Value;

/// Naive layouts produced by older writers that did not attach an offset.
/// They are read as UTC.
const NAIVE_LAYOUTS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

const DATE_LAYOUT: &str = "%Y-%m-%d";

// ─── Timestamps ──────────────────────────────────────────────────────────────

/// A timestamp in either of the shapes a caller or a row may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeValue<'a> {
  Text(&'a str),
  Instant(DateTime<Utc>),
}

impl<'a> From<&'a str> for TimeValue<'a> {
  fn from(s: &'a str) -> Self { Self::Text(s) }
}

impl<'a> From<&'a String> for TimeValue<'a> {
  fn from(s: &'a String) -> Self { Self::Text(s) }
}

impl From<DateTime<Utc>> for TimeValue<'_> {
  fn from(dt: DateTime<Utc>) -> Self { Self::Instant(dt) }
}

/// The canonical stored form: RFC 3339, UTC, `Z` suffix, sub-seconds only
/// when present.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Render a timestamp for storage. Strings pass through verbatim, instants
/// are formatted canonically, absent values yield `default`.
pub fn timestamp_string(value: Option<TimeValue<'_>>, default: &str) -> String {
  match value {
    Some(TimeValue::Text(s)) => s.to_owned(),
    Some(TimeValue::Instant(dt)) => format_timestamp(dt),
    None => default.to_owned(),
  }
}

/// Parse a timestamp from whatever shape it arrives in.
///
/// Empty strings and `None` are absent. A trailing `Z` is read as `+00:00`.
pub fn parse_timestamp(value: Option<TimeValue<'_>>) -> Option<DateTime<Utc>> {
  match value? {
    TimeValue::Instant(dt) => Some(dt),
    TimeValue::Text(s) => parse_timestamp_text(s),
  }
}

/// Parse a timestamp out of a raw stored attribute.
pub fn timestamp_from_value(value: Option<&Value>) -> Option<DateTime<Utc>> {
  match value? {
    Value::Null => None,
    Value::String(s) => parse_timestamp_text(s),
    other => {
      tracing::warn!(value = %other, "ignoring non-string timestamp attribute");
      None
    }
  }
}

fn parse_timestamp_text(raw: &str) -> Option<DateTime<Utc>> {
  let trimmed = raw.trim();
  if trimmed.is_empty() {
    return None;
  }

  let zoned = match trimmed.strip_suffix('Z') {
    Some(head) => format!("{head}+00:00"),
    None => trimmed.to_owned(),
  };

  if let Ok(dt) = DateTime::parse_from_rfc3339(&zoned) {
    return Some(dt.with_timezone(&Utc));
  }

  for layout in NAIVE_LAYOUTS {
    if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, layout) {
      return Some(naive.and_utc());
    }
  }

  if let Ok(date) = NaiveDate::parse_from_str(trimmed, DATE_LAYOUT) {
    return Some(date.and_time(NaiveTime::MIN).and_utc());
  }

  tracing::warn!(value = raw, "unparseable timestamp, treating as absent");
  None
}

// ─── Calendar dates ──────────────────────────────────────────────────────────

pub fn format_date(date: NaiveDate) -> String {
  date.format(DATE_LAYOUT).to_string()
}

/// Parse a calendar date; full timestamps contribute their UTC date.
pub fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
  let raw = value?.trim();
  if raw.is_empty() {
    return None;
  }
  if let Ok(date) = NaiveDate::parse_from_str(raw, DATE_LAYOUT) {
    return Some(date);
  }
  parse_timestamp_text(raw).map(|dt| dt.date_naive())
}

// ─── Enumerations ────────────────────────────────────────────────────────────

/// The plain string for an enumeration value.
///
/// Accepts either a typed enum (every status enum derives
/// [`strum::AsRefStr`]) or a plain string from a row written before the field
/// was typed; both come back as the same stored string.
pub fn enum_string(value: impl AsRef<str>) -> String { value.as_ref().to_owned() }

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::subscription::SubscriptionStatus;

  #[test]
  fn strings_pass_through_verbatim() {
    assert_eq!(
      timestamp_string(Some("2025-08-05".into()), ""),
      "2025-08-05"
    );
    assert_eq!(timestamp_string(None, "n/a"), "n/a");
  }

  #[test]
  fn formatting_then_parsing_is_lossless() {
    let samples = [
      Utc.with_ymd_and_hms(2025, 8, 5, 1, 0, 0).unwrap(),
      Utc.timestamp_opt(1_754_355_600, 123_456_000).unwrap(),
      Utc.timestamp_opt(0, 1).unwrap(),
    ];
    for t in samples {
      let text = timestamp_string(Some(t.into()), "");
      assert_eq!(parse_timestamp(Some(TimeValue::Text(&text))), Some(t));
    }
  }

  #[test]
  fn trailing_z_and_explicit_offset_agree() {
    let z = parse_timestamp(Some("2025-08-05T01:00:00Z".into()));
    let offset = parse_timestamp(Some("2025-08-05T01:00:00+00:00".into()));
    assert!(z.is_some());
    assert_eq!(z, offset);
  }

  #[test]
  fn naive_legacy_strings_read_as_utc() {
    let parsed = parse_timestamp(Some("2025-08-05T01:00:00.250000".into()))
      .expect("naive iso");
    assert_eq!(
      parsed,
      Utc.timestamp_opt(1_754_355_600, 250_000_000).unwrap()
    );
    assert!(parse_timestamp(Some("2025-08-05 01:00:00".into())).is_some());
  }

  #[test]
  fn absent_and_garbage_are_none() {
    assert_eq!(parse_timestamp(None), None);
    assert_eq!(parse_timestamp(Some("".into())), None);
    assert_eq!(parse_timestamp(Some("next tuesday".into())), None);
    assert_eq!(timestamp_from_value(Some(&Value::from(42))), None);
    assert_eq!(timestamp_from_value(Some(&Value::Null)), None);
  }

  #[test]
  fn instants_are_returned_as_is() {
    let now = Utc::now();
    assert_eq!(parse_timestamp(Some(now.into())), Some(now));
  }

  #[test]
  fn dates_accept_timestamps() {
    let d = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
    assert_eq!(parse_date(Some("2024-02-29")), Some(d));
    assert_eq!(parse_date(Some("2024-02-29T23:00:00Z")), Some(d));
    assert_eq!(parse_date(Some("29/02/2024")), None);
    assert_eq!(format_date(d), "2024-02-29");
  }

  #[test]
  fn enum_string_accepts_both_shapes() {
    assert_eq!(enum_string(SubscriptionStatus::Inactive), "inactive");
    assert_eq!(enum_string("inactive"), "inactive");
    assert_eq!(enum_string(String::from("legacy")), "legacy");
  }
}

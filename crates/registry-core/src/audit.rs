//! Audit events and account-lockout records.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
  error::{EntityKind, Result},
  normalize::{ItemReader, ItemWriter, Record, UPDATED_AT},
  store::{Item, Table},
};

pub mod fields {
  use crate::normalize::Field;

  pub const ID: Field = Field::new("id", &["eventId", "event_id"]);
  pub const ACTOR_ID: Field = Field::new("actorId", &["userId", "user_id", "personId"]);
  pub const ACTION: Field = Field::new("action", &["eventType", "event_type"]);
  pub const RESOURCE_TYPE: Field = Field::new("resourceType", &["resource_type"]);
  pub const RESOURCE_ID: Field = Field::new("resourceId", &["resource_id"]);
  pub const TIMESTAMP: Field = Field::new("timestamp", &["createdAt", "created_at"]);
  pub const SEVERITY: Field = Field::plain("severity");
  pub const SUCCESS: Field = Field::plain("success");
  pub const ERROR_MESSAGE: Field = Field::new("errorMessage", &["error_message"]);
  pub const IP_ADDRESS: Field = Field::new("ipAddress", &["ip_address"]);
  pub const USER_AGENT: Field = Field::new("userAgent", &["user_agent"]);
  pub const DETAILS: Field = Field::plain("details");

  pub const LOCKOUT_PERSON_ID: Field = Field::new("personId", &["person_id"]);
  pub const FAILED_ATTEMPTS: Field = Field::new("failedAttempts", &["failed_attempts"]);
  pub const LOCKED_UNTIL: Field = Field::new("lockedUntil", &["locked_until"]);
  pub const LAST_ATTEMPT_AT: Field = Field::new("lastAttemptAt", &["last_attempt_at"]);
  pub const IP_ADDRESSES: Field = Field::new("ipAddresses", &["ip_addresses"]);
}

use fields as f;

// ─── Events ──────────────────────────────────────────────────────────────────

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
  strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum AuditAction {
  Create,
  Read,
  Update,
  Delete,
  Login,
  Logout,
  AdminAction,
  SecurityEvent,
  Export,
  Import,
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::AsRefStr,
  strum::EnumString,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Severity {
  #[default]
  Low,
  Medium,
  High,
  Critical,
}

/// Who performed an operation, and from where.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
  pub id:         String,
  pub ip_address: Option<String>,
  pub user_agent: Option<String>,
}

impl Actor {
  pub fn new(id: impl Into<String>) -> Self {
    Self { id: id.into(), ip_address: None, user_agent: None }
  }

  /// Attributed to the service itself.
  pub fn system() -> Self { Self::new("system") }

  pub fn from_ip(mut self, ip: impl Into<String>) -> Self {
    self.ip_address = Some(ip.into());
    self
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
  pub id:            String,
  pub actor_id:      String,
  pub action:        AuditAction,
  pub resource_type: String,
  pub resource_id:   Option<String>,
  pub timestamp:     DateTime<Utc>,
  pub severity:      Severity,
  pub success:       bool,
  pub error_message: Option<String>,
  pub ip_address:    Option<String>,
  pub user_agent:    Option<String>,
  pub details:       Item,
}

impl AuditEvent {
  pub fn new(
    actor: &Actor,
    action: AuditAction,
    resource_type: EntityKind,
    resource_id: impl Into<String>,
  ) -> Self {
    Self {
      id:            Uuid::new_v4().to_string(),
      actor_id:      actor.id.clone(),
      action,
      resource_type: resource_type.to_string(),
      resource_id:   Some(resource_id.into()),
      timestamp:     Utc::now(),
      severity:      Severity::default(),
      success:       true,
      error_message: None,
      ip_address:    actor.ip_address.clone(),
      user_agent:    actor.user_agent.clone(),
      details:       Item::new(),
    }
  }

  pub fn severity(mut self, severity: Severity) -> Self {
    self.severity = severity;
    self
  }

  pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
    self.details.insert(key.to_owned(), value.into());
    self
  }

  /// Mark the event as a failed attempt. Failures are at least `Medium`.
  pub fn failed(mut self, message: impl Into<String>) -> Self {
    self.success = false;
    self.error_message = Some(message.into());
    self.severity = self.severity.max(Severity::Medium);
    self
  }
}

impl Record for AuditEvent {
  const ENTITY: EntityKind = EntityKind::AuditEvent;
  const TABLE: Table = Table::AuditLogs;

  fn key(&self) -> &str { &self.id }

  fn from_item(item: &Item) -> Result<Self> {
    let r = ItemReader::new(Self::ENTITY, item);
    Ok(Self {
      id:            r.required(&f::ID)?,
      actor_id:      r.opt_string(&f::ACTOR_ID).unwrap_or_else(|| "unknown".to_owned()),
      action:        r.enumeration(&f::ACTION, AuditAction::SecurityEvent),
      resource_type: r.string(&f::RESOURCE_TYPE),
      resource_id:   r.opt_string(&f::RESOURCE_ID),
      timestamp:     r.timestamp(&f::TIMESTAMP).unwrap_or_default(),
      severity:      r.enumeration(&f::SEVERITY, Severity::default()),
      success:       r.bool(&f::SUCCESS, true),
      error_message: r.opt_string(&f::ERROR_MESSAGE),
      ip_address:    r.opt_string(&f::IP_ADDRESS),
      user_agent:    r.opt_string(&f::USER_AGENT),
      details:       r.object(&f::DETAILS).cloned().unwrap_or_default(),
    })
  }

  fn to_item(&self) -> Item {
    ItemWriter::new()
      .set(&f::ID, self.id.as_str())
      .set(&f::ACTOR_ID, self.actor_id.as_str())
      .set(&f::ACTION, self.action.to_string())
      .set(&f::RESOURCE_TYPE, self.resource_type.as_str())
      .set_opt(&f::RESOURCE_ID, self.resource_id.as_deref())
      .timestamp(&f::TIMESTAMP, self.timestamp)
      .set(&f::SEVERITY, self.severity.to_string())
      .set(&f::SUCCESS, self.success)
      .set_opt(&f::ERROR_MESSAGE, self.error_message.as_deref())
      .set_opt(&f::IP_ADDRESS, self.ip_address.as_deref())
      .set_opt(&f::USER_AGENT, self.user_agent.as_deref())
      .set(&f::DETAILS, Value::Object(self.details.clone()))
      .finish()
  }
}

// ─── Lockouts ────────────────────────────────────────────────────────────────

/// Thresholds for locking an account after repeated failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
  pub max_attempts:  u32,
  pub lock_duration: Duration,
  /// How many distinct source addresses to remember.
  pub ip_history:    usize,
}

impl Default for LockoutPolicy {
  fn default() -> Self {
    Self {
      max_attempts:  5,
      lock_duration: Duration::minutes(15),
      ip_history:    10,
    }
  }
}

/// Failed-login bookkeeping for one person, keyed by person id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLockout {
  pub person_id:       String,
  pub failed_attempts: u32,
  pub locked_until:    Option<DateTime<Utc>>,
  pub last_attempt_at: DateTime<Utc>,
  pub ip_addresses:    Vec<String>,
}

impl AccountLockout {
  pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
    self.locked_until.is_some_and(|until| until > now)
  }

  /// The record after one more failed attempt.
  ///
  /// An expired lock starts a fresh count. Reaching `max_attempts` locks the
  /// account for `lock_duration` from `now`.
  pub fn after_failure(
    previous: Option<Self>,
    person_id: &str,
    ip: Option<&str>,
    policy: &LockoutPolicy,
    now: DateTime<Utc>,
  ) -> Self {
    let mut record = match previous {
      Some(prev) if prev.locked_until.is_some_and(|until| until <= now) => Self {
        failed_attempts: 0,
        locked_until: None,
        ..prev
      },
      Some(prev) => prev,
      None => Self {
        person_id:       person_id.to_owned(),
        failed_attempts: 0,
        locked_until:    None,
        last_attempt_at: now,
        ip_addresses:    Vec::new(),
      },
    };

    record.failed_attempts = record.failed_attempts.saturating_add(1);
    record.last_attempt_at = now;
    if let Some(ip) = ip {
      if !record.ip_addresses.iter().any(|seen| seen == ip) {
        record.ip_addresses.push(ip.to_owned());
      }
      let excess = record.ip_addresses.len().saturating_sub(policy.ip_history);
      record.ip_addresses.drain(..excess);
    }
    if record.failed_attempts >= policy.max_attempts && !record.is_locked(now) {
      record.locked_until = Some(now + policy.lock_duration);
    }
    record
  }
}

impl Record for AccountLockout {
  const ENTITY: EntityKind = EntityKind::Lockout;
  const TABLE: Table = Table::AccountLockouts;

  fn key(&self) -> &str { &self.person_id }

  fn from_item(item: &Item) -> Result<Self> {
    let r = ItemReader::new(Self::ENTITY, item);
    Ok(Self {
      person_id:       r.required(&f::LOCKOUT_PERSON_ID)?,
      failed_attempts: r.count(&f::FAILED_ATTEMPTS, 0),
      locked_until:    r.timestamp(&f::LOCKED_UNTIL),
      last_attempt_at: r
        .timestamp(&f::LAST_ATTEMPT_AT)
        .or_else(|| r.timestamp(&UPDATED_AT))
        .unwrap_or_default(),
      ip_addresses:    r.strings(&f::IP_ADDRESSES),
    })
  }

  fn to_item(&self) -> Item {
    ItemWriter::new()
      .set(&f::LOCKOUT_PERSON_ID, self.person_id.as_str())
      .set(&f::FAILED_ATTEMPTS, self.failed_attempts)
      .opt_timestamp(&f::LOCKED_UNTIL, self.locked_until)
      .timestamp(&f::LAST_ATTEMPT_AT, self.last_attempt_at)
      .set(&f::IP_ADDRESSES, self.ip_addresses.clone())
      .finish()
  }
}

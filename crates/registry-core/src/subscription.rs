//! Subscriptions: the link between one person and one project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  error::{EntityKind, Error, Result},
  normalize::{CREATED_AT, ItemReader, ItemWriter, Record, UPDATED_AT},
  repository::Patch,
  store::{Item, Table},
  update::Changes,
};

pub mod fields {
  use crate::normalize::Field;

  pub const ID: Field = Field::plain("id");
  pub const PERSON_ID: Field = Field::new("personId", &["person_id", "userId"]);
  pub const PROJECT_ID: Field = Field::new("projectId", &["project_id"]);
  pub const STATUS: Field = Field::new("status", &["subscriptionStatus"]);
  pub const NOTES: Field = Field::new("notes", &["note", "comments"]);
  /// Boolean predecessor of `status`. Only read when `status` is absent.
  pub const LEGACY_ACTIVE: Field = Field::new("isActive", &["is_active"]);
}

use fields as f;

/// Namespace for deterministic subscription identifiers.
const PAIR_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a7e_93d4_4b0a_8e55_1d2c_7a90_b3e1);

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  strum::Display,
  strum::AsRefStr,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SubscriptionStatus {
  Pending,
  #[default]
  Active,
  Cancelled,
  Completed,
  Inactive,
}

impl SubscriptionStatus {
  /// Every status except `Inactive` counts toward the one-per-pair rule.
  pub fn is_live(self) -> bool { self != Self::Inactive }

  pub fn is_terminal(self) -> bool { matches!(self, Self::Cancelled | Self::Completed) }

  /// Whether a direct move from `self` to `next` is allowed.
  pub fn can_transition_to(self, next: Self) -> bool {
    use SubscriptionStatus::*;
    matches!(
      (self, next),
      (Pending, Active | Inactive | Cancelled)
        | (Active, Inactive | Completed | Cancelled)
        | (Inactive, Pending)
    )
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
  pub id:         String,
  pub person_id:  String,
  pub project_id: String,
  pub status:     SubscriptionStatus,
  pub notes:      String,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
}

impl Subscription {
  /// The identifier a new subscription for this pair is created under.
  ///
  /// Deterministic, so concurrent subscribes for the same pair collide on
  /// the primary key instead of producing two rows.
  pub fn pair_key(person_id: &str, project_id: &str) -> String {
    Uuid::new_v5(&PAIR_NAMESPACE, format!("{person_id}:{project_id}").as_bytes()).to_string()
  }

  pub fn new(
    person_id: &str,
    project_id: &str,
    status: SubscriptionStatus,
    notes: String,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      id: Self::pair_key(person_id, project_id),
      person_id: person_id.to_owned(),
      project_id: project_id.to_owned(),
      status,
      notes,
      created_at: now,
      updated_at: now,
    }
  }
}

impl Record for Subscription {
  const ENTITY: EntityKind = EntityKind::Subscription;
  const TABLE: Table = Table::Subscriptions;

  fn key(&self) -> &str { &self.id }

  fn from_item(item: &Item) -> Result<Self> {
    let r = ItemReader::new(Self::ENTITY, item);
    let status = if r.raw(&f::STATUS).is_some() {
      r.enumeration(&f::STATUS, SubscriptionStatus::default())
    } else if r.bool(&f::LEGACY_ACTIVE, true) {
      SubscriptionStatus::Active
    } else {
      SubscriptionStatus::Inactive
    };
    Ok(Self {
      id: r.required(&f::ID)?,
      person_id: r.required(&f::PERSON_ID)?,
      project_id: r.required(&f::PROJECT_ID)?,
      status,
      notes: r.string(&f::NOTES),
      created_at: r.timestamp(&CREATED_AT).unwrap_or_default(),
      updated_at: r.timestamp(&UPDATED_AT).unwrap_or_default(),
    })
  }

  fn to_item(&self) -> Item {
    ItemWriter::new()
      .set(&f::ID, self.id.as_str())
      .set(&f::PERSON_ID, self.person_id.as_str())
      .set(&f::PROJECT_ID, self.project_id.as_str())
      .set(&f::STATUS, self.status.to_string())
      .set(&f::NOTES, self.notes.as_str())
      .timestamp(&CREATED_AT, self.created_at)
      .timestamp(&UPDATED_AT, self.updated_at)
      .finish()
  }
}

// ─── Updates ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionUpdate {
  pub status: Option<SubscriptionStatus>,
  pub notes:  Option<String>,
}

impl SubscriptionUpdate {
  pub fn status(status: SubscriptionStatus) -> Self {
    Self { status: Some(status), notes: None }
  }

  pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
    self.notes = Some(notes.into());
    self
  }
}

impl Patch<Subscription> for SubscriptionUpdate {
  fn validate(&self, current: &Subscription) -> Result<()> {
    match self.status {
      Some(next) if next != current.status && !current.status.can_transition_to(next) => {
        Err(Error::Validation(format!(
          "subscription cannot move from {} to {next}",
          current.status
        )))
      }
      _ => Ok(()),
    }
  }

  fn changes(&self) -> Changes {
    let mut changes = Changes::new().set_opt(f::NOTES, self.notes.as_deref());
    if let Some(status) = self.status {
      // Writing status retires the boolean predecessor too.
      changes = changes.set_enum(f::STATUS, status).remove(f::LEGACY_ACTIVE);
    }
    changes
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn read(v: serde_json::Value) -> Result<Subscription> {
    Subscription::from_item(v.as_object().unwrap())
  }

  #[test]
  fn legacy_boolean_maps_to_status() {
    let off = read(json!({ "id": "s", "person_id": "p", "project_id": "j", "isActive": false }));
    assert_eq!(off.unwrap().status, SubscriptionStatus::Inactive);

    let on = read(json!({ "id": "s", "person_id": "p", "project_id": "j", "is_active": true }));
    assert_eq!(on.unwrap().status, SubscriptionStatus::Active);

    let both = read(json!({
      "id": "s", "personId": "p", "projectId": "j",
      "status": "pending", "isActive": false,
    }));
    assert_eq!(both.unwrap().status, SubscriptionStatus::Pending);
  }

  #[test]
  fn unknown_status_defaults_with_warning() {
    let sub = read(json!({ "id": "s", "personId": "p", "projectId": "j", "status": "ARCHIVED" }));
    assert_eq!(sub.unwrap().status, SubscriptionStatus::Active);
  }

  #[test]
  fn references_are_mandatory() {
    let err = read(json!({ "id": "s", "personId": "p" })).unwrap_err();
    assert!(matches!(err, Error::MissingField { field: "projectId", .. }));
  }

  #[test]
  fn pair_key_is_stable_and_pair_specific() {
    assert_eq!(Subscription::pair_key("p", "j"), Subscription::pair_key("p", "j"));
    assert_ne!(Subscription::pair_key("p", "j"), Subscription::pair_key("j", "p"));
  }

  #[test]
  fn transitions() {
    use SubscriptionStatus::*;
    assert!(Pending.can_transition_to(Active));
    assert!(Active.can_transition_to(Inactive));
    assert!(Inactive.can_transition_to(Pending));
    assert!(!Inactive.can_transition_to(Active));
    assert!(!Completed.can_transition_to(Active));
    assert!(Cancelled.is_live() && Cancelled.is_terminal());
    assert!(!Inactive.is_live());
  }

  #[test]
  fn illegal_update_is_rejected() {
    let current = Subscription::new("p", "j", SubscriptionStatus::Completed, String::new(), Utc::now());
    let err = SubscriptionUpdate::status(SubscriptionStatus::Pending).validate(&current);
    assert!(matches!(err, Err(Error::Validation(_))));
    assert!(SubscriptionUpdate::status(SubscriptionStatus::Completed).validate(&current).is_ok());
  }

  #[test]
  fn status_change_retires_legacy_flag() {
    let changes = SubscriptionUpdate::status(SubscriptionStatus::Inactive).changes();
    assert!(changes.touches(&f::LEGACY_ACTIVE));
    assert_eq!(changes.value_of(&f::STATUS), Some(&json!("inactive")));
  }
}

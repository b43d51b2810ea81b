//! Projects people can subscribe to.

use chrono::{DateTime, NaiveDate, Utc};
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
  pub const NAME: Field = Field::new("name", &["project_name", "title"]);
  pub const DESCRIPTION: Field = Field::plain("description");
  pub const START_DATE: Field = Field::new("startDate", &["start_date"]);
  pub const END_DATE: Field = Field::new("endDate", &["end_date"]);
  pub const REGISTRATION_END_DATE: Field =
    Field::new("registrationEndDate", &["registration_end_date", "registrationDeadline"]);
  pub const MAX_PARTICIPANTS: Field =
    Field::new("maxParticipants", &["max_participants", "capacity"]);
  pub const STATUS: Field = Field::plain("status");
  pub const CATEGORY: Field = Field::plain("category");
  pub const LOCATION: Field = Field::plain("location");
  pub const REQUIREMENTS: Field = Field::plain("requirements");
  pub const IS_ENABLED: Field = Field::new("isEnabled", &["is_enabled", "enabled"]);
  pub const CREATED_BY: Field = Field::new("createdBy", &["created_by", "ownerId"]);
}

use fields as f;

/// Owner recorded for rows that predate ownership tracking.
pub const SYSTEM_OWNER: &str = "system";

const MAX_CAPACITY: u32 = 1000;

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::AsRefStr,
  strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProjectStatus {
  #[default]
  Pending,
  Active,
  Completed,
  Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
  pub id:                    String,
  pub name:                  String,
  pub description:           String,
  pub start_date:            Option<NaiveDate>,
  pub end_date:              Option<NaiveDate>,
  pub registration_end_date: Option<NaiveDate>,
  pub max_participants:      u32,
  pub status:                ProjectStatus,
  pub category:              Option<String>,
  pub location:              Option<String>,
  pub requirements:          Option<String>,
  pub is_enabled:            bool,
  pub created_by:            String,
  pub created_at:            DateTime<Utc>,
  pub updated_at:            DateTime<Utc>,
}

impl Record for Project {
  const ENTITY: EntityKind = EntityKind::Project;
  const TABLE: Table = Table::Projects;

  fn key(&self) -> &str { &self.id }

  fn from_item(item: &Item) -> Result<Self> {
    let r = ItemReader::new(Self::ENTITY, item);
    Ok(Self {
      id:                    r.required(&f::ID)?,
      name:                  r.string(&f::NAME),
      description:           r.string(&f::DESCRIPTION),
      start_date:            r.date(&f::START_DATE),
      end_date:              r.date(&f::END_DATE),
      registration_end_date: r.date(&f::REGISTRATION_END_DATE),
      max_participants:      r.count(&f::MAX_PARTICIPANTS, 0),
      status:                r.enumeration(&f::STATUS, ProjectStatus::default()),
      category:              r.opt_string(&f::CATEGORY),
      location:              r.opt_string(&f::LOCATION),
      requirements:          r.opt_string(&f::REQUIREMENTS),
      is_enabled:            r.bool(&f::IS_ENABLED, true),
      created_by:            r.opt_string(&f::CREATED_BY).unwrap_or_else(|| SYSTEM_OWNER.to_owned()),
      created_at:            r.timestamp(&CREATED_AT).unwrap_or_default(),
      updated_at:            r.timestamp(&UPDATED_AT).unwrap_or_default(),
    })
  }

  fn to_item(&self) -> Item {
    ItemWriter::new()
      .set(&f::ID, self.id.as_str())
      .set(&f::NAME, self.name.as_str())
      .set(&f::DESCRIPTION, self.description.as_str())
      .opt_date(&f::START_DATE, self.start_date)
      .opt_date(&f::END_DATE, self.end_date)
      .opt_date(&f::REGISTRATION_END_DATE, self.registration_end_date)
      .set(&f::MAX_PARTICIPANTS, self.max_participants)
      .set(&f::STATUS, self.status.to_string())
      .set_opt(&f::CATEGORY, self.category.as_deref())
      .set_opt(&f::LOCATION, self.location.as_deref())
      .set_opt(&f::REQUIREMENTS, self.requirements.as_deref())
      .set(&f::IS_ENABLED, self.is_enabled)
      .set(&f::CREATED_BY, self.created_by.as_str())
      .timestamp(&CREATED_AT, self.created_at)
      .timestamp(&UPDATED_AT, self.updated_at)
      .finish()
  }
}

fn validate_schedule(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<()> {
  match (start, end) {
    (Some(start), Some(end)) if end <= start => Err(Error::Validation(format!(
      "end date {end} must be after start date {start}"
    ))),
    _ => Ok(()),
  }
}

fn validate_capacity(capacity: u32) -> Result<()> {
  if (1..=MAX_CAPACITY).contains(&capacity) {
    Ok(())
  } else {
    Err(Error::Validation(format!(
      "max participants must be between 1 and {MAX_CAPACITY}"
    )))
  }
}

// ─── Creation ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
  pub name:                  String,
  #[serde(default)]
  pub description:           String,
  pub start_date:            Option<NaiveDate>,
  pub end_date:              Option<NaiveDate>,
  #[serde(default)]
  pub registration_end_date: Option<NaiveDate>,
  pub max_participants:      u32,
  #[serde(default)]
  pub status:                ProjectStatus,
  #[serde(default)]
  pub category:              Option<String>,
  #[serde(default)]
  pub location:              Option<String>,
  #[serde(default)]
  pub requirements:          Option<String>,
}

impl NewProject {
  pub fn validate(&self) -> Result<()> {
    if self.name.trim().is_empty() {
      return Err(Error::Validation("project name is required".into()));
    }
    validate_capacity(self.max_participants)?;
    validate_schedule(self.start_date, self.end_date)
  }

  pub fn into_project(self, created_by: &str, now: DateTime<Utc>) -> Project {
    Project {
      id:                    Uuid::new_v4().to_string(),
      name:                  self.name.trim().to_owned(),
      description:           self.description,
      start_date:            self.start_date,
      end_date:              self.end_date,
      registration_end_date: self.registration_end_date,
      max_participants:      self.max_participants,
      status:                self.status,
      category:              self.category.filter(|s| !s.is_empty()),
      location:              self.location.filter(|s| !s.is_empty()),
      requirements:          self.requirements.filter(|s| !s.is_empty()),
      is_enabled:            true,
      created_by:            created_by.to_owned(),
      created_at:            now,
      updated_at:            now,
    }
  }
}

// ─── Updates ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectUpdate {
  pub name:                  Option<String>,
  pub description:           Option<String>,
  pub start_date:            Option<NaiveDate>,
  pub end_date:              Option<NaiveDate>,
  pub registration_end_date: Option<NaiveDate>,
  pub max_participants:      Option<u32>,
  pub status:                Option<ProjectStatus>,
  pub category:              Option<String>,
  pub location:              Option<String>,
  pub requirements:          Option<String>,
  pub is_enabled:            Option<bool>,
}

impl Patch<Project> for ProjectUpdate {
  /// Dates are checked against the merged result, so moving only the end
  /// date before the stored start date is rejected too.
  fn validate(&self, current: &Project) -> Result<()> {
    if let Some(capacity) = self.max_participants {
      validate_capacity(capacity)?;
    }
    if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
      return Err(Error::Validation("project name cannot be blank".into()));
    }
    validate_schedule(
      self.start_date.or(current.start_date),
      self.end_date.or(current.end_date),
    )
  }

  fn changes(&self) -> Changes {
    let mut changes = Changes::new()
      .set_opt(f::NAME, self.name.as_deref().map(str::trim))
      .set_opt(f::DESCRIPTION, self.description.as_deref())
      .set_opt(f::MAX_PARTICIPANTS, self.max_participants)
      .set_opt(f::CATEGORY, self.category.as_deref())
      .set_opt(f::LOCATION, self.location.as_deref())
      .set_opt(f::REQUIREMENTS, self.requirements.as_deref())
      .set_opt(f::IS_ENABLED, self.is_enabled);
    for (field, date) in [
      (f::START_DATE, self.start_date),
      (f::END_DATE, self.end_date),
      (f::REGISTRATION_END_DATE, self.registration_end_date),
    ] {
      if let Some(date) = date {
        changes = changes.set_date(field, date);
      }
    }
    if let Some(status) = self.status {
      changes = changes.set_enum(f::STATUS, status);
    }
    changes
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use serde_json::json;

  use super::*;

  fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> { NaiveDate::from_ymd_opt(y, m, d) }

  fn new_project() -> NewProject {
    NewProject {
      name:                  "River cleanup".into(),
      description:           "Saturday mornings".into(),
      start_date:            date(2025, 6, 1),
      end_date:              date(2025, 6, 30),
      registration_end_date: None,
      max_participants:      20,
      status:                ProjectStatus::Active,
      category:              Some("environment".into()),
      location:              None,
      requirements:          None,
    }
  }

  #[test]
  fn end_must_follow_start() {
    assert!(new_project().validate().is_ok());

    let same_day = NewProject { end_date: date(2025, 6, 1), ..new_project() };
    assert!(matches!(same_day.validate(), Err(Error::Validation(_))));

    let zero = NewProject { max_participants: 0, ..new_project() };
    assert!(zero.validate().is_err());
  }

  #[test]
  fn update_checks_merged_schedule() {
    let current = new_project().into_project("admin", Utc::now());
    let moved_end = ProjectUpdate { end_date: date(2025, 5, 1), ..Default::default() };
    assert!(moved_end.validate(&current).is_err());

    let both = ProjectUpdate {
      start_date: date(2025, 4, 1),
      end_date: date(2025, 5, 1),
      ..Default::default()
    };
    assert!(both.validate(&current).is_ok());
  }

  #[test]
  fn canonical_form_round_trips() {
    let project =
      new_project().into_project("admin", Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(Project::from_item(&project.to_item()).unwrap(), project);
  }

  #[test]
  fn legacy_row_defaults() {
    let row = json!({
      "id": "j1",
      "title": "Dig",
      "capacity": "15",
      "status": "ARCHIVED",
      "start_date": "2025-06-01",
    });
    let project = Project::from_item(row.as_object().unwrap()).unwrap();
    assert_eq!(project.name, "Dig");
    assert_eq!(project.max_participants, 15);
    assert_eq!(project.status, ProjectStatus::Pending);
    assert_eq!(project.start_date, date(2025, 6, 1));
    assert_eq!(project.created_by, SYSTEM_OWNER);
    assert!(project.is_enabled);
  }

  #[test]
  fn status_parses_any_case() {
    assert_eq!("ACTIVE".parse::<ProjectStatus>().unwrap(), ProjectStatus::Active);
    assert!("ongoing".parse::<ProjectStatus>().is_err());
  }
}

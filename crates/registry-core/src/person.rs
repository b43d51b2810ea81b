//! People: registrants and administrators.
//!
//! Credential material lives on the same stored row but never enters
//! [`Person`]; it is read and written through [`Credentials`] only.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
  error::{EntityKind, Error, Result},
  normalize::{
    CREATED_AT, Field, ItemReader, ItemWriter, Record, UPDATED_AT, sanitize_email,
  },
  repository::Patch,
  store::{Item, Table},
  update::Changes,
};

// ─── Field table ─────────────────────────────────────────────────────────────

pub mod fields {
  use crate::normalize::Field;

  pub const ID: Field = Field::plain("id");
  pub const FIRST_NAME: Field = Field::new("firstName", &["first_name"]);
  pub const LAST_NAME: Field = Field::new("lastName", &["last_name"]);
  pub const EMAIL: Field = Field::new("email", &["emailAddress", "email_address"]);
  pub const PHONE: Field = Field::new("phone", &["phoneNumber", "phone_number"]);
  pub const DATE_OF_BIRTH: Field = Field::new("dateOfBirth", &["date_of_birth", "dob"]);
  pub const ADDRESS: Field = Field::plain("address");
  pub const IS_ADMIN: Field = Field::new("isAdmin", &["is_admin"]);
  pub const IS_ACTIVE: Field = Field::new("isActive", &["is_active"]);
  pub const EMAIL_VERIFIED: Field = Field::new("emailVerified", &["email_verified"]);
  pub const REQUIRE_PASSWORD_CHANGE: Field =
    Field::new("requirePasswordChange", &["require_password_change"]);
  pub const FAILED_LOGIN_ATTEMPTS: Field =
    Field::new("failedLoginAttempts", &["failed_login_attempts"]);
  pub const ACCOUNT_LOCKED_UNTIL: Field =
    Field::new("accountLockedUntil", &["account_locked_until"]);
  pub const LAST_LOGIN_AT: Field = Field::new("lastLoginAt", &["last_login_at", "lastLogin"]);

  pub const PASSWORD_HASH: Field = Field::new("passwordHash", &["password_hash"]);
  pub const PASSWORD_SALT: Field = Field::new("passwordSalt", &["password_salt"]);
  pub const PASSWORD_HISTORY: Field = Field::new("passwordHistory", &["password_history"]);
  pub const LAST_PASSWORD_CHANGE: Field =
    Field::new("lastPasswordChange", &["last_password_change"]);

  pub mod address {
    use crate::normalize::Field;

    pub const STREET: Field = Field::new("street", &["street_address", "address1"]);
    pub const CITY: Field = Field::plain("city");
    pub const STATE: Field = Field::new("state", &["province", "region"]);
    pub const POSTAL_CODE: Field =
      Field::new("postalCode", &["postal_code", "zipCode", "zip_code"]);
    pub const COUNTRY: Field = Field::plain("country");
  }
}

use fields as f;

// ─── Address ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
  pub street:      String,
  pub city:        String,
  pub state:       String,
  pub postal_code: String,
  pub country:     String,
}

impl Address {
  pub fn from_object(object: &Item) -> Self {
    let r = ItemReader::new(EntityKind::Person, object);
    Self {
      street:      r.string(&f::address::STREET),
      city:        r.string(&f::address::CITY),
      state:       r.string(&f::address::STATE),
      postal_code: r.string(&f::address::POSTAL_CODE),
      country:     r.string(&f::address::COUNTRY),
    }
  }

  pub fn to_object(&self) -> Item {
    ItemWriter::new()
      .set(&f::address::STREET, self.street.as_str())
      .set(&f::address::CITY, self.city.as_str())
      .set(&f::address::STATE, self.state.as_str())
      .set(&f::address::POSTAL_CODE, self.postal_code.as_str())
      .set(&f::address::COUNTRY, self.country.as_str())
      .finish()
  }
}

// ─── Person ──────────────────────────────────────────────────────────────────

/// The canonical person model. Missing timestamps read as the Unix epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
  pub id:                      String,
  pub first_name:              String,
  pub last_name:               String,
  pub email:                   String,
  pub phone:                   String,
  pub date_of_birth:           Option<NaiveDate>,
  pub address:                 Address,
  pub is_admin:                bool,
  pub is_active:               bool,
  pub email_verified:          bool,
  pub require_password_change: bool,
  pub failed_login_attempts:   u32,
  pub account_locked_until:    Option<DateTime<Utc>>,
  pub last_login_at:           Option<DateTime<Utc>>,
  pub created_at:              DateTime<Utc>,
  pub updated_at:              DateTime<Utc>,
}

impl Person {
  pub fn full_name(&self) -> String {
    format!("{} {}", self.first_name, self.last_name).trim().to_owned()
  }
}

impl Record for Person {
  const ENTITY: EntityKind = EntityKind::Person;
  const TABLE: Table = Table::People;

  fn key(&self) -> &str { &self.id }

  fn from_item(item: &Item) -> Result<Self> {
    let r = ItemReader::new(Self::ENTITY, item);
    Ok(Self {
      id:                      r.required(&f::ID)?,
      first_name:              r.string(&f::FIRST_NAME),
      last_name:               r.string(&f::LAST_NAME),
      email:                   sanitize_email(&r.string(&f::EMAIL)).into_owned(),
      phone:                   r.string(&f::PHONE),
      date_of_birth:           r.date(&f::DATE_OF_BIRTH),
      address:                 r.object(&f::ADDRESS).map(Address::from_object).unwrap_or_default(),
      is_admin:                r.bool(&f::IS_ADMIN, false),
      is_active:               r.bool(&f::IS_ACTIVE, true),
      email_verified:          r.bool(&f::EMAIL_VERIFIED, false),
      require_password_change: r.bool(&f::REQUIRE_PASSWORD_CHANGE, false),
      failed_login_attempts:   r.count(&f::FAILED_LOGIN_ATTEMPTS, 0),
      account_locked_until:    r.timestamp(&f::ACCOUNT_LOCKED_UNTIL),
      last_login_at:           r.timestamp(&f::LAST_LOGIN_AT),
      created_at:              r.timestamp(&CREATED_AT).unwrap_or_default(),
      updated_at:              r.timestamp(&UPDATED_AT).unwrap_or_default(),
    })
  }

  fn to_item(&self) -> Item {
    ItemWriter::new()
      .set(&f::ID, self.id.as_str())
      .set(&f::FIRST_NAME, self.first_name.as_str())
      .set(&f::LAST_NAME, self.last_name.as_str())
      .set(&f::EMAIL, self.email.as_str())
      .set(&f::PHONE, self.phone.as_str())
      .opt_date(&f::DATE_OF_BIRTH, self.date_of_birth)
      .set(&f::ADDRESS, Value::Object(self.address.to_object()))
      .set(&f::IS_ADMIN, self.is_admin)
      .set(&f::IS_ACTIVE, self.is_active)
      .set(&f::EMAIL_VERIFIED, self.email_verified)
      .set(&f::REQUIRE_PASSWORD_CHANGE, self.require_password_change)
      .set(&f::FAILED_LOGIN_ATTEMPTS, self.failed_login_attempts)
      .opt_timestamp(&f::ACCOUNT_LOCKED_UNTIL, self.account_locked_until)
      .opt_timestamp(&f::LAST_LOGIN_AT, self.last_login_at)
      .timestamp(&CREATED_AT, self.created_at)
      .timestamp(&UPDATED_AT, self.updated_at)
      .finish()
  }
}

// ─── Creation ────────────────────────────────────────────────────────────────

/// Input for registering a new person.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewPerson {
  pub first_name:    String,
  pub last_name:     String,
  pub email:         String,
  pub phone:         String,
  pub date_of_birth: Option<NaiveDate>,
  pub address:       Address,
  pub is_admin:      bool,
}

impl NewPerson {
  pub fn validate(&self) -> Result<()> {
    if self.first_name.trim().is_empty() || self.last_name.trim().is_empty() {
      return Err(Error::Validation("first and last name are required".into()));
    }
    validate_email(&self.email)
  }

  /// Materialise with a fresh identifier. Stored emails are trimmed.
  pub fn into_person(self, now: DateTime<Utc>) -> Person {
    Person {
      id:                      Uuid::new_v4().to_string(),
      first_name:              self.first_name.trim().to_owned(),
      last_name:               self.last_name.trim().to_owned(),
      email:                   self.email.trim().to_owned(),
      phone:                   self.phone,
      date_of_birth:           self.date_of_birth,
      address:                 self.address,
      is_admin:                self.is_admin,
      is_active:               true,
      email_verified:          false,
      require_password_change: false,
      failed_login_attempts:   0,
      account_locked_until:    None,
      last_login_at:           None,
      created_at:              now,
      updated_at:              now,
    }
  }
}

fn validate_email(email: &str) -> Result<()> {
  match email.trim().split_once('@') {
    Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
    _ => Err(Error::Validation(format!("invalid email address: {email:?}"))),
  }
}

// ─── Updates ─────────────────────────────────────────────────────────────────

/// A partial profile update. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonUpdate {
  pub first_name:              Option<String>,
  pub last_name:               Option<String>,
  pub email:                   Option<String>,
  pub phone:                   Option<String>,
  pub date_of_birth:           Option<NaiveDate>,
  pub address:                 Option<Address>,
  pub is_admin:                Option<bool>,
  pub is_active:               Option<bool>,
  pub email_verified:          Option<bool>,
  pub require_password_change: Option<bool>,
}

impl Patch<Person> for PersonUpdate {
  fn validate(&self, _current: &Person) -> Result<()> {
    if let Some(email) = &self.email {
      validate_email(email)?;
    }
    for name in [&self.first_name, &self.last_name].into_iter().flatten() {
      if name.trim().is_empty() {
        return Err(Error::Validation("names cannot be blank".into()));
      }
    }
    Ok(())
  }

  fn changes(&self) -> Changes {
    let mut changes = Changes::new()
      .set_opt(f::FIRST_NAME, self.first_name.as_deref().map(str::trim))
      .set_opt(f::LAST_NAME, self.last_name.as_deref().map(str::trim))
      .set_opt(f::EMAIL, self.email.as_deref().map(str::trim))
      .set_opt(f::PHONE, self.phone.as_deref())
      .set_opt(f::IS_ADMIN, self.is_admin)
      .set_opt(f::IS_ACTIVE, self.is_active)
      .set_opt(f::EMAIL_VERIFIED, self.email_verified)
      .set_opt(f::REQUIRE_PASSWORD_CHANGE, self.require_password_change);
    if let Some(dob) = self.date_of_birth {
      changes = changes.set_date(f::DATE_OF_BIRTH, dob);
    }
    if let Some(address) = &self.address {
      changes = changes.set_object(f::ADDRESS, address.to_object());
    }
    changes
  }
}

// ─── Credentials ─────────────────────────────────────────────────────────────

/// Password material stored alongside a person. `Debug` never prints it.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
  pub password_hash:        Option<String>,
  pub password_salt:        Option<String>,
  pub password_history:     Vec<String>,
  pub last_password_change: Option<DateTime<Utc>>,
}

impl fmt::Debug for Credentials {
  fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt
      .debug_struct("Credentials")
      .field("has_hash", &self.password_hash.is_some())
      .field("history_len", &self.password_history.len())
      .field("last_password_change", &self.last_password_change)
      .finish_non_exhaustive()
  }
}

impl Credentials {
  pub fn from_item(item: &Item) -> Self {
    let r = ItemReader::new(EntityKind::Person, item);
    Self {
      password_hash:        r.opt_string(&f::PASSWORD_HASH),
      password_salt:        r.opt_string(&f::PASSWORD_SALT),
      password_history:     r.strings(&f::PASSWORD_HISTORY),
      last_password_change: r.timestamp(&f::LAST_PASSWORD_CHANGE),
    }
  }

  /// Write the credential attributes into an existing person row.
  pub fn write_into(&self, item: &mut Item) {
    let written = ItemWriter::new()
      .set_opt(&f::PASSWORD_HASH, self.password_hash.as_deref())
      .set_opt(&f::PASSWORD_SALT, self.password_salt.as_deref())
      .set(&f::PASSWORD_HISTORY, self.password_history.clone())
      .opt_timestamp(&f::LAST_PASSWORD_CHANGE, self.last_password_change)
      .finish();
    item.extend(written);
  }

  pub fn changes(&self) -> Changes {
    let mut changes = Changes::new()
      .set(f::PASSWORD_HISTORY, self.password_history.clone());
    changes = match &self.password_hash {
      Some(hash) => changes.set(f::PASSWORD_HASH, hash.as_str()),
      None => changes.remove(f::PASSWORD_HASH),
    };
    changes = match &self.password_salt {
      Some(salt) => changes.set(f::PASSWORD_SALT, salt.as_str()),
      None => changes.remove(f::PASSWORD_SALT),
    };
    match self.last_password_change {
      Some(at) => changes.set_timestamp(f::LAST_PASSWORD_CHANGE, at),
      None => changes,
    }
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;
  use serde_json::json;

  use super::*;

  fn item(v: Value) -> Item { v.as_object().cloned().unwrap() }

  fn sample() -> Person {
    NewPerson {
      first_name: "Ana".into(),
      last_name: "Lima".into(),
      email: "ana@example.org".into(),
      phone: "555-0100".into(),
      date_of_birth: NaiveDate::from_ymd_opt(1990, 4, 1),
      address: Address {
        city: "Lyon".into(),
        postal_code: "69001".into(),
        ..Address::default()
      },
      is_admin: false,
    }
    .into_person(Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap())
  }

  #[test]
  fn canonical_form_round_trips() {
    let person = sample();
    assert_eq!(Person::from_item(&person.to_item()).unwrap(), person);
  }

  #[test]
  fn legacy_spellings_converge() {
    let camel = item(json!({
      "id": "p1",
      "firstName": "Ana",
      "lastName": "Lima",
      "email": "ana@example.org",
      "isAdmin": true,
      "createdAt": "2024-01-01T00:00:00Z",
      "address": { "postalCode": "69001" },
    }));
    let snake = item(json!({
      "id": "p1",
      "first_name": "Ana",
      "last_name": "Lima",
      "email_address": "ana@example.org",
      "is_admin": "true",
      "created_at": "2024-01-01T00:00:00",
      "address": { "zip_code": "69001" },
    }));
    assert_eq!(Person::from_item(&camel).unwrap(), Person::from_item(&snake).unwrap());
  }

  #[test]
  fn sparse_rows_get_defaults() {
    let person = Person::from_item(&item(json!({ "id": "p1", "address": "n/a" }))).unwrap();
    assert!(person.is_active);
    assert!(!person.is_admin);
    assert_eq!(person.email, "");
    assert_eq!(person.address, Address::default());
    assert_eq!(person.created_at, DateTime::<Utc>::default());
  }

  #[test]
  fn missing_id_is_an_error() {
    let err = Person::from_item(&item(json!({ "email": "a@b.org" }))).unwrap_err();
    assert!(matches!(err, Error::MissingField { field: "id", .. }));
  }

  #[test]
  fn person_never_carries_credentials() {
    let mut row = sample().to_item();
    Credentials {
      password_hash: Some("h".into()),
      password_salt: Some("s".into()),
      ..Credentials::default()
    }
    .write_into(&mut row);
    let reread = Person::from_item(&row).unwrap().to_item();
    assert!(!reread.contains_key("passwordHash"));
    assert!(!reread.contains_key("passwordSalt"));
    assert_eq!(Credentials::from_item(&row).password_hash.as_deref(), Some("h"));
  }

  #[test]
  fn credentials_debug_hides_material() {
    let creds = Credentials { password_hash: Some("secret-hash".into()), ..Default::default() };
    assert!(!format!("{creds:?}").contains("secret-hash"));
  }

  #[test]
  fn update_validation() {
    let current = sample();
    let bad = PersonUpdate { email: Some("nope".into()), ..Default::default() };
    assert!(matches!(bad.validate(&current), Err(Error::Validation(_))));

    let ok = PersonUpdate { phone: Some("1".into()), ..Default::default() };
    assert!(ok.validate(&current).is_ok());
    assert_eq!(ok.changes().len(), 1);
  }
}

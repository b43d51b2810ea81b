//! Generic repositories: the only code that talks to an [`ItemStore`].
//!
//! A [`Repository`] couples one [`Record`] type to its table. It turns store
//! failures into the crate's [`Error`] taxonomy, normalises every row it
//! reads, and routes every write through [`UpdateInstruction`] so rows
//! converge on the canonical field convention.

use std::{marker::PhantomData, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
  error::{EntityKind, Error, Result},
  normalize::{Record, email_lookup_key, sanitize_for_logging},
  person::{self, Credentials, NewPerson, Person, PersonUpdate},
  project::{self, NewProject, Project, ProjectStatus},
  store::{FailureKind, Filter, Item, ItemStore, PutMode, StoreFailure},
  subscription::{self, Subscription},
  update::{Changes, UpdateInstruction},
};

/// A partial update to a record.
pub trait Patch<R> {
  /// Reject the patch given the current stored state.
  fn validate(&self, _current: &R) -> Result<()> { Ok(()) }

  fn changes(&self) -> Changes;
}

/// Raw changes bypass validation.
impl<R> Patch<R> for Changes {
  fn changes(&self) -> Changes { self.clone() }
}

// ─── Failure mapping ─────────────────────────────────────────────────────────

/// Map a backend failure onto the taxonomy; transient kinds stay retryable.
pub(crate) fn store_error<E: StoreFailure>(
  entity: EntityKind,
  operation: &'static str,
  err: E,
) -> Error {
  match err.kind() {
    FailureKind::Transient => {
      tracing::warn!(%entity, operation, error = %err, "transient store failure");
      Error::Transient { entity, operation, source: Box::new(err) }
    }
    FailureKind::ConditionFailed | FailureKind::Other => {
      tracing::error!(%entity, operation, error = %err, "store operation failed");
      Error::Unexpected { entity, operation, source: Box::new(err) }
    }
  }
}

// ─── Repository ──────────────────────────────────────────────────────────────

pub struct Repository<S, R> {
  store:   Arc<S>,
  _record: PhantomData<fn() -> R>,
}

impl<S, R> Clone for Repository<S, R> {
  fn clone(&self) -> Self {
    Self { store: Arc::clone(&self.store), _record: PhantomData }
  }
}

impl<S: ItemStore, R: Record> Repository<S, R> {
  pub fn new(store: Arc<S>) -> Self { Self { store, _record: PhantomData } }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// Insert a new record. Fails with [`Error::Conflict`] only when the key
  /// is already taken; business-level uniqueness is the caller's concern.
  pub async fn create(&self, record: R) -> Result<R> {
    self.insert(record.key().to_owned(), record.to_item()).await?;
    tracing::debug!(entity = %R::ENTITY, id = record.key(), "created");
    Ok(record)
  }

  pub(crate) async fn insert(&self, key: String, item: Item) -> Result<()> {
    match self.store.put_item(R::TABLE, item, PutMode::Create).await {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == FailureKind::ConditionFailed => {
        Err(Error::conflict(R::ENTITY, format!("{key} already exists")))
      }
      Err(e) => Err(store_error(R::ENTITY, "create", e)),
    }
  }

  /// Overwrite the stored row with the record's canonical form.
  pub async fn save(&self, record: &R) -> Result<()> {
    self
      .store
      .put_item(R::TABLE, record.to_item(), PutMode::Replace)
      .await
      .map_err(|e| store_error(R::ENTITY, "save", e))
  }

  pub(crate) async fn get_item(&self, id: &str) -> Result<Option<Item>> {
    self
      .store
      .get_item(R::TABLE, id.to_owned())
      .await
      .map_err(|e| store_error(R::ENTITY, "get", e))
  }

  /// `Ok(None)` when absent. A row that cannot be normalised is an error.
  pub async fn get_by_id(&self, id: &str) -> Result<Option<R>> {
    let Some(item) = self.get_item(id).await? else {
      return Ok(None);
    };
    R::from_item(&item).map(Some).inspect_err(|e| {
      tracing::error!(
        entity = %R::ENTITY,
        id,
        row = %sanitize_for_logging(&item),
        error = %e,
        "stored row cannot be normalised"
      );
    })
  }

  pub async fn require(&self, id: &str) -> Result<R> {
    self
      .get_by_id(id)
      .await?
      .ok_or_else(|| Error::not_found(R::ENTITY, id))
  }

  /// Apply a partial update and return the record afterwards.
  ///
  /// An empty patch still stamps `updatedAt`.
  pub async fn update<P: Patch<R>>(&self, id: &str, patch: &P) -> Result<R> {
    let current = self.require(id).await?;
    patch.validate(&current)?;
    self.apply(id, &patch.changes()).await
  }

  pub(crate) async fn apply(&self, id: &str, changes: &Changes) -> Result<R> {
    let instruction = UpdateInstruction::build(changes);
    tracing::debug!(
      entity = %R::ENTITY,
      id,
      expression = %instruction.expression(),
      "updating"
    );
    let updated = self
      .store
      .update_item(R::TABLE, id.to_owned(), instruction)
      .await
      .map_err(|e| store_error(R::ENTITY, "update", e))?
      .ok_or_else(|| Error::not_found(R::ENTITY, id))?;
    R::from_item(&updated)
  }

  /// Remove a record. Absent records are [`Error::NotFound`].
  pub async fn delete(&self, id: &str) -> Result<()> {
    let removed = self
      .store
      .delete_item(R::TABLE, id.to_owned())
      .await
      .map_err(|e| store_error(R::ENTITY, "delete", e))?;
    if removed {
      tracing::debug!(entity = %R::ENTITY, id, "deleted");
      Ok(())
    } else {
      Err(Error::not_found(R::ENTITY, id))
    }
  }

  pub async fn list_all(&self, limit: Option<usize>) -> Result<Vec<R>> {
    self.find(Vec::new(), limit).await
  }

  /// Every row matching `filters`. Rows that cannot be normalised are
  /// logged and skipped so one bad row never fails a listing.
  pub async fn find(&self, filters: Vec<Filter>, limit: Option<usize>) -> Result<Vec<R>> {
    let items = self
      .store
      .scan(R::TABLE, filters, limit)
      .await
      .map_err(|e| store_error(R::ENTITY, "scan", e))?;

    let mut records = Vec::with_capacity(items.len());
    for item in items {
      match R::from_item(&item) {
        Ok(record) => records.push(record),
        Err(e) => tracing::warn!(
          entity = %R::ENTITY,
          row = %sanitize_for_logging(&item),
          error = %e,
          "skipping row that cannot be normalised"
        ),
      }
    }
    Ok(records)
  }
}

// ─── People ──────────────────────────────────────────────────────────────────

impl<S: ItemStore> Repository<S, Person> {
  /// Look up by email, trimmed and case-insensitive. When several rows share
  /// an address an active one wins.
  pub async fn get_by_email(&self, email: &str) -> Result<Option<Person>> {
    let key = email_lookup_key(email);
    if key.is_empty() {
      return Ok(None);
    }
    let mut matches = self
      .find(vec![Filter::eq_ignore_case(person::fields::EMAIL, key)], None)
      .await?;
    let active = matches.iter().position(|p| p.is_active).unwrap_or(0);
    Ok((!matches.is_empty()).then(|| matches.swap_remove(active)))
  }

  /// Whether an active person other than `except` already uses `email`.
  pub async fn email_taken(&self, email: &str, except: Option<&str>) -> Result<bool> {
    let key = email_lookup_key(email);
    let matches = self
      .find(vec![Filter::eq_ignore_case(person::fields::EMAIL, key)], None)
      .await?;
    Ok(matches.iter().any(|p| p.is_active && Some(p.id.as_str()) != except))
  }

  /// Validate, check email uniqueness, and create.
  pub async fn register(
    &self,
    new: NewPerson,
    credentials: Option<Credentials>,
  ) -> Result<Person> {
    new.validate()?;
    if self.email_taken(&new.email, None).await? {
      return Err(Error::conflict(
        Person::ENTITY,
        format!("email {} is already registered", new.email.trim()),
      ));
    }
    let person = new.into_person(Utc::now());
    let mut item = person.to_item();
    if let Some(credentials) = credentials {
      credentials.write_into(&mut item);
    }
    self.insert(person.id.clone(), item).await?;
    tracing::info!(id = %person.id, "person registered");
    Ok(person)
  }

  /// Profile update that keeps emails unique among active people.
  pub async fn update_profile(&self, id: &str, patch: &PersonUpdate) -> Result<Person> {
    if let Some(email) = &patch.email {
      if self.email_taken(email, Some(id)).await? {
        return Err(Error::conflict(
          Person::ENTITY,
          format!("email {} is already registered", email.trim()),
        ));
      }
    }
    self.update(id, patch).await
  }

  pub async fn credentials(&self, id: &str) -> Result<Credentials> {
    self
      .get_item(id)
      .await?
      .map(|item| Credentials::from_item(&item))
      .ok_or_else(|| Error::not_found(Person::ENTITY, id))
  }

  pub async fn set_credentials(&self, id: &str, credentials: &Credentials) -> Result<()> {
    self.require(id).await?;
    self.apply(id, &credentials.changes()).await?;
    Ok(())
  }

  /// Stamp a successful login and clear any per-person lock state.
  pub async fn record_login(&self, id: &str, at: DateTime<Utc>) -> Result<Person> {
    let changes = Changes::new()
      .set_timestamp(person::fields::LAST_LOGIN_AT, at)
      .set(person::fields::FAILED_LOGIN_ATTEMPTS, 0)
      .remove(person::fields::ACCOUNT_LOCKED_UNTIL);
    self.update(id, &changes).await
  }
}

// ─── Projects ────────────────────────────────────────────────────────────────

impl<S: ItemStore> Repository<S, Project> {
  pub async fn create_project(&self, new: NewProject, created_by: &str) -> Result<Project> {
    new.validate()?;
    self.create(new.into_project(created_by, Utc::now())).await
  }

  pub async fn list_by_status(
    &self,
    status: ProjectStatus,
    limit: Option<usize>,
  ) -> Result<Vec<Project>> {
    if status != ProjectStatus::default() {
      return self
        .find(vec![Filter::eq_ignore_case(project::fields::STATUS, status.to_string())], limit)
        .await;
    }
    // Rows without a status, or with one we no longer know, read as the
    // default, so that listing has to filter after normalisation.
    let mut rows: Vec<Project> = self
      .list_all(None)
      .await?
      .into_iter()
      .filter(|p| p.status == status)
      .collect();
    if let Some(limit) = limit {
      rows.truncate(limit);
    }
    Ok(rows)
  }
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

impl<S: ItemStore> Repository<S, Subscription> {
  /// Every subscription of a person, regardless of status.
  pub async fn list_by_person(&self, person_id: &str) -> Result<Vec<Subscription>> {
    self
      .find(vec![Filter::eq(subscription::fields::PERSON_ID, person_id)], None)
      .await
  }

  pub async fn list_by_project(&self, project_id: &str) -> Result<Vec<Subscription>> {
    self
      .find(vec![Filter::eq(subscription::fields::PROJECT_ID, project_id)], None)
      .await
  }

  /// Every row for one (person, project) pair, live or not.
  pub async fn list_for_pair(
    &self,
    person_id: &str,
    project_id: &str,
  ) -> Result<Vec<Subscription>> {
    self
      .find(
        vec![
          Filter::eq(subscription::fields::PERSON_ID, person_id),
          Filter::eq(subscription::fields::PROJECT_ID, project_id),
        ],
        None,
      )
      .await
  }
}

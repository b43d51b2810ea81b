//! The audit sink: append-only audit events and lockout bookkeeping.
//!
//! Recording an audit event never fails the operation that produced it; a
//! store failure is logged and swallowed. Lockout reads and writes do
//! propagate errors, since callers base access decisions on them.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
  audit::{AccountLockout, Actor, AuditAction, AuditEvent, LockoutPolicy, Severity},
  error::{EntityKind, Error, Result},
  repository::Repository,
  store::ItemStore,
};

pub struct AuditSink<S> {
  events:   Repository<S, AuditEvent>,
  lockouts: Repository<S, AccountLockout>,
}

impl<S> Clone for AuditSink<S> {
  fn clone(&self) -> Self {
    Self { events: self.events.clone(), lockouts: self.lockouts.clone() }
  }
}

impl<S: ItemStore> AuditSink<S> {
  pub fn new(store: Arc<S>) -> Self {
    Self {
      events:   Repository::new(Arc::clone(&store)),
      lockouts: Repository::new(store),
    }
  }

  /// Persist `event`, returning its id on success.
  pub async fn record(&self, event: AuditEvent) -> Option<String> {
    let id = event.id.clone();
    let (action, resource) = (event.action, event.resource_id.clone());
    match self.events.create(event).await {
      Ok(_) => Some(id),
      Err(e) => {
        tracing::warn!(
          %action,
          resource = resource.as_deref().unwrap_or("-"),
          error = %e,
          "audit event dropped"
        );
        None
      }
    }
  }

  /// The most recent events first, up to `limit`.
  pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEvent>> {
    let mut events = self.events.list_all(None).await?;
    events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    events.truncate(limit);
    Ok(events)
  }

  pub async fn lockout(&self, person_id: &str) -> Result<Option<AccountLockout>> {
    self.lockouts.get_by_id(person_id).await
  }

  pub async fn is_locked(&self, person_id: &str, now: DateTime<Utc>) -> Result<bool> {
    Ok(self.lockout(person_id).await?.is_some_and(|l| l.is_locked(now)))
  }

  /// Full overwrite of the lockout record.
  pub async fn save_lockout(&self, lockout: &AccountLockout) -> Result<()> {
    self.lockouts.save(lockout).await
  }

  /// Remove the lockout record. Clearing an absent record is not an error.
  pub async fn clear_lockout(&self, person_id: &str) -> Result<()> {
    match self.lockouts.delete(person_id).await {
      Ok(()) | Err(Error::NotFound { .. }) => Ok(()),
      Err(e) => Err(e),
    }
  }

  /// Administrative unlock: clear the lockout and audit who did it.
  pub async fn unlock(&self, actor: &Actor, person_id: &str) -> Result<()> {
    let held = self.lockout(person_id).await?.is_some();
    self.clear_lockout(person_id).await?;
    self
      .record(
        AuditEvent::new(actor, AuditAction::AdminAction, EntityKind::Lockout, person_id)
          .severity(Severity::Medium)
          .detail("operation", "unlock")
          .detail("hadLockout", held),
      )
      .await;
    tracing::info!(person_id, actor = %actor.id, "lockout cleared");
    Ok(())
  }

  /// Count one failed attempt and persist the result.
  pub async fn register_failure(
    &self,
    person_id: &str,
    ip: Option<&str>,
    policy: &LockoutPolicy,
  ) -> Result<AccountLockout> {
    let now = Utc::now();
    let previous = self.lockout(person_id).await?;
    let was_locked = previous.as_ref().is_some_and(|l| l.is_locked(now));
    let next = AccountLockout::after_failure(previous, person_id, ip, policy, now);
    self.save_lockout(&next).await?;
    if next.is_locked(now) && !was_locked {
      tracing::warn!(
        person_id,
        attempts = next.failed_attempts,
        until = ?next.locked_until,
        "account locked"
      );
    }
    Ok(next)
  }
}

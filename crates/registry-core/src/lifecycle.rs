//! The subscription lifecycle and the cross-entity invariants it guards.
//!
//! - At most one live (non-`inactive`) subscription per (person, project).
//! - Subscribing again reactivates a dormant row instead of adding one.
//! - Deleting a person takes their subscriptions with them.
//!
//! New subscriptions are created under a key derived from the pair, with a
//! conditional create, so concurrent subscribes cannot both insert.

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
  audit::{Actor, AuditAction, AuditEvent, Severity},
  error::{EntityKind, Error, Result},
  notify::{Notification, Notifier},
  person::Person,
  repository::{Repository, store_error},
  sink::AuditSink,
  store::{ItemKey, ItemStore, Table},
  subscription::{Subscription, SubscriptionStatus, SubscriptionUpdate},
  update::Changes,
};

/// Template sent to the person when a subscription is approved.
pub const APPROVED_TEMPLATE: &str = "subscription_approved";

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
  pub person_id:  String,
  pub project_id: String,
  /// Defaults to `pending`.
  #[serde(default)]
  pub status:     Option<SubscriptionStatus>,
  #[serde(default)]
  pub notes:      Option<String>,
}

impl SubscribeRequest {
  pub fn new(person_id: impl Into<String>, project_id: impl Into<String>) -> Self {
    Self {
      person_id:  person_id.into(),
      project_id: project_id.into(),
      status:     None,
      notes:      None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SubscribeOutcome {
  Created,
  /// A live subscription already existed and is returned unchanged.
  Existing,
  /// A dormant subscription was moved back to `pending`.
  Reactivated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribed {
  pub subscription: Subscription,
  pub outcome:      SubscribeOutcome,
}

/// How [`SubscriptionEngine::delete_person`] removes rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
  /// One all-or-nothing transaction where the backend supports it, falling
  /// back to best effort where it does not.
  #[default]
  Atomic,
  /// Subscriptions first, then the person; failures are reported, not fatal.
  BestEffort,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeReport {
  pub person_id:             String,
  pub person_deleted:        bool,
  pub subscriptions_found:   usize,
  pub subscriptions_deleted: usize,
  /// `(row id, error)` for every row left behind.
  pub failures:              Vec<(String, String)>,
  pub atomic:                bool,
}

impl CascadeReport {
  pub fn is_complete(&self) -> bool {
    self.person_deleted && self.failures.is_empty()
  }
}

/// More than one live row for one (person, project) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateSet {
  pub person_id:  String,
  pub project_id: String,
  pub keep:       Subscription,
  pub retire:     Vec<Subscription>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
  pub dry_run:  bool,
  pub sets:     Vec<DuplicateSet>,
  pub retired:  usize,
  pub failures: Vec<(String, String)>,
}

// ─── Engine ──────────────────────────────────────────────────────────────────

pub struct SubscriptionEngine<S, N> {
  people:        Repository<S, Person>,
  subscriptions: Repository<S, Subscription>,
  audit:         AuditSink<S>,
  notifier:      N,
  cascade:       CascadePolicy,
}

impl<S: ItemStore, N: Notifier> SubscriptionEngine<S, N> {
  pub fn new(store: Arc<S>, notifier: N) -> Self {
    Self {
      people: Repository::new(Arc::clone(&store)),
      subscriptions: Repository::new(Arc::clone(&store)),
      audit: AuditSink::new(store),
      notifier,
      cascade: CascadePolicy::default(),
    }
  }

  pub fn with_cascade_policy(mut self, policy: CascadePolicy) -> Self {
    self.cascade = policy;
    self
  }

  pub fn people(&self) -> &Repository<S, Person> { &self.people }

  pub fn subscriptions(&self) -> &Repository<S, Subscription> { &self.subscriptions }

  pub fn audit(&self) -> &AuditSink<S> { &self.audit }

  // ── Subscribe ─────────────────────────────────────────────────────────

  /// Subscribe a person to a project, keeping at most one live row.
  pub async fn subscribe(&self, actor: &Actor, request: SubscribeRequest) -> Result<Subscribed> {
    let status = request.status.unwrap_or(SubscriptionStatus::Pending);
    if !status.is_live() {
      return Err(Error::Validation("cannot subscribe with status inactive".into()));
    }
    self.people.require(&request.person_id).await?;

    let rows = self
      .subscriptions
      .list_for_pair(&request.person_id, &request.project_id)
      .await?;
    if let Some(live) = preferred_live(&rows) {
      return Ok(Subscribed { subscription: live.clone(), outcome: SubscribeOutcome::Existing });
    }
    if let Some(dormant) = newest(rows.iter()) {
      return self.reactivate(actor, &dormant.id, request.notes).await;
    }

    let notes = request.notes.clone().unwrap_or_default();
    let fresh = Subscription::new(
      &request.person_id,
      &request.project_id,
      status,
      notes,
      chrono::Utc::now(),
    );
    match self.subscriptions.create(fresh).await {
      Ok(created) => {
        self
          .audit
          .record(AuditEvent::new(actor, AuditAction::Create, EntityKind::Subscription, &created.id)
            .detail("personId", created.person_id.as_str())
            .detail("projectId", created.project_id.as_str()))
          .await;
        tracing::info!(
          id = %created.id,
          person_id = %created.person_id,
          project_id = %created.project_id,
          "subscription created"
        );
        Ok(Subscribed { subscription: created, outcome: SubscribeOutcome::Created })
      }
      Err(Error::Conflict { .. }) => self.resolve_lost_race(actor, &request).await,
      Err(e) => Err(e),
    }
  }

  /// A concurrent subscribe created the pair row between our check and our
  /// insert. Read it back and answer as if we had seen it first.
  async fn resolve_lost_race(&self, actor: &Actor, request: &SubscribeRequest) -> Result<Subscribed> {
    let key = Subscription::pair_key(&request.person_id, &request.project_id);
    tracing::debug!(%key, "lost subscribe race, re-reading pair row");
    match self.subscriptions.get_by_id(&key).await? {
      Some(row) if row.status.is_live() => {
        Ok(Subscribed { subscription: row, outcome: SubscribeOutcome::Existing })
      }
      Some(row) => self.reactivate(actor, &row.id, request.notes.clone()).await,
      None => Err(Error::conflict(
        EntityKind::Subscription,
        "subscription changed concurrently, retry",
      )),
    }
  }

  async fn reactivate(&self, actor: &Actor, id: &str, notes: Option<String>) -> Result<Subscribed> {
    // Notes from the retired row never carry over.
    let update =
      SubscriptionUpdate::status(SubscriptionStatus::Pending).with_notes(notes.unwrap_or_default());
    let subscription = self.subscriptions.update(id, &update).await?;
    self
      .audit
      .record(AuditEvent::new(actor, AuditAction::Update, EntityKind::Subscription, id)
        .detail("reactivated", true))
      .await;
    tracing::info!(id, "subscription reactivated");
    Ok(Subscribed { subscription, outcome: SubscribeOutcome::Reactivated })
  }

  // ── Transitions ───────────────────────────────────────────────────────

  /// Move a subscription to `target`. Idempotent when already there.
  pub async fn transition(
    &self,
    actor: &Actor,
    id: &str,
    target: SubscriptionStatus,
  ) -> Result<Subscription> {
    Ok(self.move_to(actor, id, target).await?.0)
  }

  /// Returns the row afterwards and whether it changed.
  async fn move_to(
    &self,
    actor: &Actor,
    id: &str,
    target: SubscriptionStatus,
  ) -> Result<(Subscription, bool)> {
    let current = self.subscriptions.require(id).await?;
    if current.status == target {
      return Ok((current, false));
    }
    if target.is_live() && !current.status.is_live() {
      self.ensure_no_other_live(&current).await?;
    }
    let updated = self
      .subscriptions
      .update(id, &SubscriptionUpdate::status(target))
      .await?;
    self
      .audit
      .record(AuditEvent::new(actor, AuditAction::Update, EntityKind::Subscription, id)
        .detail("from", current.status.to_string())
        .detail("to", target.to_string()))
      .await;
    Ok((updated, true))
  }

  /// Move to `active` and notify the person. A failed notification is
  /// logged and does not undo the approval.
  pub async fn approve(&self, actor: &Actor, id: &str) -> Result<Subscription> {
    let (approved, changed) = self.move_to(actor, id, SubscriptionStatus::Active).await?;
    if changed {
      self.notify_approved(&approved).await;
    }
    Ok(approved)
  }

  /// Declining retires the subscription; the person may subscribe again.
  pub async fn decline(&self, actor: &Actor, id: &str) -> Result<Subscription> {
    self.transition(actor, id, SubscriptionStatus::Inactive).await
  }

  async fn ensure_no_other_live(&self, current: &Subscription) -> Result<()> {
    let rows = self
      .subscriptions
      .list_for_pair(&current.person_id, &current.project_id)
      .await?;
    if rows.iter().any(|s| s.id != current.id && s.status.is_live()) {
      return Err(Error::conflict(
        EntityKind::Subscription,
        format!(
          "person {} already has a live subscription to project {}",
          current.person_id, current.project_id
        ),
      ));
    }
    Ok(())
  }

  async fn notify_approved(&self, subscription: &Subscription) {
    let person = match self.people.get_by_id(&subscription.person_id).await {
      Ok(Some(person)) if !person.email.is_empty() => person,
      Ok(_) => {
        tracing::warn!(id = %subscription.id, "no deliverable address for approval notice");
        return;
      }
      Err(e) => {
        tracing::warn!(id = %subscription.id, error = %e, "could not load person for approval notice");
        return;
      }
    };
    let notice = Notification::new(person.email.as_str(), APPROVED_TEMPLATE)
      .var("firstName", person.first_name.as_str())
      .var("projectId", subscription.project_id.as_str())
      .var("subscriptionId", subscription.id.as_str());
    if let Err(e) = self.notifier.send(notice).await {
      tracing::warn!(id = %subscription.id, error = %e, "approval notification failed");
    }
  }

  // ── Person deletion ───────────────────────────────────────────────────

  /// Delete a person and every subscription that references them.
  pub async fn delete_person(&self, actor: &Actor, person_id: &str) -> Result<CascadeReport> {
    self.people.require(person_id).await?;
    let subscriptions = self.subscriptions.list_by_person(person_id).await?;

    let mut report = CascadeReport {
      person_id: person_id.to_owned(),
      subscriptions_found: subscriptions.len(),
      ..CascadeReport::default()
    };

    let done_atomically = match self.cascade {
      CascadePolicy::Atomic => self.delete_atomically(person_id, &subscriptions).await?,
      CascadePolicy::BestEffort => false,
    };
    if done_atomically {
      report.atomic = true;
      report.person_deleted = true;
      report.subscriptions_deleted = subscriptions.len();
    } else {
      self.delete_best_effort(person_id, &subscriptions, &mut report).await;
    }

    let mut event = AuditEvent::new(actor, AuditAction::Delete, EntityKind::Person, person_id)
      .severity(Severity::High)
      .detail("subscriptionsDeleted", report.subscriptions_deleted)
      .detail("atomic", report.atomic);
    if !report.is_complete() {
      event = event.failed(format!("{} rows left behind", report.failures.len()));
    }
    self.audit.record(event).await;

    tracing::info!(
      person_id,
      subscriptions = report.subscriptions_deleted,
      complete = report.is_complete(),
      "person deleted"
    );
    Ok(report)
  }

  async fn delete_atomically(&self, person_id: &str, subscriptions: &[Subscription]) -> Result<bool> {
    let keys = subscriptions
      .iter()
      .map(|s| ItemKey::new(Table::Subscriptions, s.id.as_str()))
      .chain(std::iter::once(ItemKey::new(Table::People, person_id)))
      .collect();
    let supported = self
      .people
      .store()
      .delete_atomically(keys)
      .await
      .map_err(|e| store_error(EntityKind::Person, "delete_cascade", e))?;
    if !supported {
      tracing::debug!("backend has no transactions, deleting row by row");
    }
    Ok(supported)
  }

  async fn delete_best_effort(
    &self,
    person_id: &str,
    subscriptions: &[Subscription],
    report: &mut CascadeReport,
  ) {
    for sub in subscriptions {
      match self.subscriptions.delete(&sub.id).await {
        Ok(()) => report.subscriptions_deleted += 1,
        // Removed by someone else since we listed it.
        Err(Error::NotFound { .. }) => report.subscriptions_deleted += 1,
        Err(e) => {
          tracing::warn!(id = %sub.id, error = %e, "subscription left behind by cascade");
          report.failures.push((sub.id.clone(), e.to_string()));
        }
      }
    }
    match self.people.delete(person_id).await {
      Ok(()) => report.person_deleted = true,
      Err(e) => {
        tracing::error!(person_id, error = %e, "person delete failed after cascade");
        report.failures.push((person_id.to_owned(), e.to_string()));
      }
    }
  }

  // ── Duplicate reconciliation ──────────────────────────────────────────

  /// Pairs that hold more than one live subscription, with the row each
  /// would keep.
  pub async fn find_duplicates(&self) -> Result<Vec<DuplicateSet>> {
    let mut by_pair: BTreeMap<(String, String), Vec<Subscription>> = BTreeMap::new();
    for sub in self.subscriptions.list_all(None).await? {
      if sub.status.is_live() {
        by_pair
          .entry((sub.person_id.clone(), sub.project_id.clone()))
          .or_default()
          .push(sub);
      }
    }

    let mut sets = Vec::new();
    for ((person_id, project_id), rows) in by_pair {
      if rows.len() < 2 {
        continue;
      }
      let Some(keep) = preferred_live(&rows).cloned() else {
        continue;
      };
      let retire = rows.into_iter().filter(|s| s.id != keep.id).collect();
      sets.push(DuplicateSet { person_id, project_id, keep, retire });
    }
    Ok(sets)
  }

  /// Mark every duplicate but the kept row inactive. With `dry_run` nothing
  /// is written.
  pub async fn reconcile_duplicates(&self, actor: &Actor, dry_run: bool) -> Result<ReconcileReport> {
    let sets = self.find_duplicates().await?;
    let mut report = ReconcileReport { dry_run, ..ReconcileReport::default() };

    if !dry_run {
      for set in &sets {
        for sub in &set.retire {
          let note = format!(
            "Marked inactive due to duplicate cleanup. Original status: {}",
            sub.status
          );
          let changes = Changes::new()
            .set_enum(crate::subscription::fields::STATUS, SubscriptionStatus::Inactive)
            .remove(crate::subscription::fields::LEGACY_ACTIVE)
            .set(crate::subscription::fields::NOTES, note);
          match self.subscriptions.update(&sub.id, &changes).await {
            Ok(_) => report.retired += 1,
            Err(e) => {
              tracing::warn!(id = %sub.id, error = %e, "could not retire duplicate");
              report.failures.push((sub.id.clone(), e.to_string()));
            }
          }
        }
      }
      self
        .audit
        .record(
          AuditEvent::new(actor, AuditAction::AdminAction, EntityKind::Subscription, "duplicates")
            .detail("sets", sets.len())
            .detail("retired", report.retired),
        )
        .await;
    }

    tracing::info!(
      dry_run,
      sets = sets.len(),
      retired = report.retired,
      "duplicate reconciliation finished"
    );
    report.sets = sets;
    Ok(report)
  }
}

// ─── Selection ───────────────────────────────────────────────────────────────

fn newest<'a>(rows: impl Iterator<Item = &'a Subscription>) -> Option<&'a Subscription> {
  rows.max_by(|a, b| a.created_at.cmp(&b.created_at))
}

/// The live row to keep: newest `active`, else newest `pending`, else the
/// newest live row of any status.
fn preferred_live(rows: &[Subscription]) -> Option<&Subscription> {
  let with = |status: SubscriptionStatus| newest(rows.iter().filter(move |s| s.status == status));
  with(SubscriptionStatus::Active)
    .or_else(|| with(SubscriptionStatus::Pending))
    .or_else(|| newest(rows.iter().filter(|s| s.status.is_live())))
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};

  use super::*;

  fn sub(id: &str, status: SubscriptionStatus, day: u32) -> Subscription {
    Subscription {
      id:         id.into(),
      person_id:  "p".into(),
      project_id: "j".into(),
      status,
      notes:      String::new(),
      created_at: Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap(),
      updated_at: Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap(),
    }
  }

  #[test]
  fn keeps_newest_active_over_newer_pending() {
    use SubscriptionStatus::*;
    let rows = [sub("a", Active, 1), sub("b", Active, 3), sub("c", Pending, 9)];
    assert_eq!(preferred_live(&rows).unwrap().id, "b");
  }

  #[test]
  fn falls_back_to_pending_then_any_live() {
    use SubscriptionStatus::*;
    let rows = [sub("a", Pending, 1), sub("b", Completed, 5), sub("c", Inactive, 9)];
    assert_eq!(preferred_live(&rows).unwrap().id, "a");

    let rows = [sub("a", Completed, 1), sub("b", Cancelled, 5), sub("c", Inactive, 9)];
    assert_eq!(preferred_live(&rows).unwrap().id, "b");

    assert!(preferred_live(&[sub("a", Inactive, 1)]).is_none());
  }

  #[test]
  fn cascade_report_completeness() {
    let mut report = CascadeReport { person_deleted: true, ..Default::default() };
    assert!(report.is_complete());
    report.failures.push(("s1".into(), "timeout".into()));
    assert!(!report.is_complete());
  }
}

//! Outbound notifications.
//!
//! Delivery is best-effort from the lifecycle's point of view: a failed send
//! is logged by the caller and never rolls back a state change.

use std::{collections::BTreeMap, future::Future};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
  pub recipient: String,
  pub template:  String,
  pub variables: BTreeMap<String, String>,
}

impl Notification {
  pub fn new(recipient: impl Into<String>, template: impl Into<String>) -> Self {
    Self {
      recipient: recipient.into(),
      template:  template.into(),
      variables: BTreeMap::new(),
    }
  }

  pub fn var(mut self, key: &str, value: impl Into<String>) -> Self {
    self.variables.insert(key.to_owned(), value.into());
    self
  }
}

#[derive(Debug, Error)]
#[error("notification to {recipient} failed: {reason}")]
pub struct NotifyError {
  pub recipient: String,
  pub reason:    String,
}

pub trait Notifier: Send + Sync {
  fn send(
    &self,
    notification: Notification,
  ) -> impl Future<Output = Result<(), NotifyError>> + Send + '_;
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
  async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
    tracing::debug!(
      template = %notification.template,
      "notification discarded"
    );
    Ok(())
  }
}

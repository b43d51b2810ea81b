//! `registry-admin`: operator commands against a registration store.
//!
//! Reads `registry.toml` (or the path given with `--config`) plus
//! `REGISTRY_*` environment overrides, opens the SQLite store, and prints
//! results as JSON lines.
//!
//! ```
//! registry-admin subscriptions --person 2f0c…
//! registry-admin reconcile            # report duplicates only
//! registry-admin reconcile --apply    # retire them
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
  time::Duration,
};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use registry_core::{
  audit::Actor,
  lifecycle::{CascadePolicy, SubscriptionEngine},
  notify::{Notification, Notifier, NotifyError},
  project::{Project, ProjectStatus},
  repository::Repository,
  subscription::Subscription,
};
use registry_store_sqlite::SqliteStore;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Registration store administration")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "registry.toml")]
  config: PathBuf,

  /// Maximum rows to print for listings.
  #[arg(long, global = true)]
  limit: Option<usize>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// List people, or look one up by email.
  People {
    #[arg(long)]
    email: Option<String>,
  },
  /// List projects, optionally by status.
  Projects {
    #[arg(long)]
    status: Option<ProjectStatus>,
  },
  /// List subscriptions for a person or a project.
  Subscriptions {
    #[arg(long, conflicts_with = "project")]
    person:  Option<String>,
    #[arg(long)]
    project: Option<String>,
  },
  /// Move a subscription to active and notify the person.
  Approve { id: String },
  /// Retire a subscription.
  Decline { id: String },
  /// Find pairs with more than one live subscription.
  Reconcile {
    /// Write the fix instead of only reporting it.
    #[arg(long)]
    apply: bool,
  },
  /// Delete a person and all of their subscriptions.
  DeletePerson { id: String },
  /// Clear the failed-login lockout for a person.
  Unlock { person_id: String },
  /// Show the most recent audit events.
  Audit,
}

// ─── Config ──────────────────────────────────────────────────────────────────

/// Runtime configuration, deserialised from `registry.toml`.
#[derive(Deserialize, Clone)]
#[serde(default)]
struct AdminConfig {
  store_path:    PathBuf,
  /// Per-operation store timeout; unset means no timeout.
  op_timeout_ms: Option<u64>,
  cascade:       CascadePolicy,
  /// Recorded as the actor on every write.
  actor:         String,
}

impl Default for AdminConfig {
  fn default() -> Self {
    Self {
      store_path:    PathBuf::from("registry.db"),
      op_timeout_ms: None,
      cascade:       CascadePolicy::default(),
      actor:         "admin-cli".to_owned(),
    }
  }
}

// ─── Notifications ───────────────────────────────────────────────────────────

/// Logs notifications instead of delivering them; the CLI has no mailer.
struct LogNotifier;

impl Notifier for LogNotifier {
  async fn send(&self, notification: Notification) -> Result<(), NotifyError> {
    tracing::info!(
      recipient = %notification.recipient,
      template = %notification.template,
      "notification queued"
    );
    Ok(())
  }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config.clone()).required(false))
    .add_source(config::Environment::with_prefix("REGISTRY"))
    .build()
    .context("failed to read config file")?;
  let cfg: AdminConfig = settings
    .try_deserialize()
    .context("failed to deserialise AdminConfig")?;

  let store_path = expand_tilde(&cfg.store_path);
  let mut store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;
  if let Some(ms) = cfg.op_timeout_ms {
    store = store.with_op_timeout(Duration::from_millis(ms));
  }
  let store = Arc::new(store);

  let engine =
    SubscriptionEngine::new(Arc::clone(&store), LogNotifier).with_cascade_policy(cfg.cascade);
  let actor = Actor::new(cfg.actor.as_str());

  run(cli.command, cli.limit, &store, &engine, &actor).await
}

async fn run(
  command: Command,
  limit: Option<usize>,
  store: &Arc<SqliteStore>,
  engine: &SubscriptionEngine<SqliteStore, LogNotifier>,
  actor: &Actor,
) -> anyhow::Result<()> {
  match command {
    Command::People { email: Some(email) } => {
      let person = engine
        .people()
        .get_by_email(&email)
        .await?
        .with_context(|| format!("no person with email {email}"))?;
      emit(&person)?;
    }
    Command::People { email: None } => {
      emit_all(engine.people().list_all(limit).await?)?;
    }
    Command::Projects { status } => {
      let projects = Repository::<_, Project>::new(Arc::clone(store));
      let rows = match status {
        Some(status) => projects.list_by_status(status, limit).await?,
        None => projects.list_all(limit).await?,
      };
      emit_all(rows)?;
    }
    Command::Subscriptions { person, project } => {
      let subscriptions = engine.subscriptions();
      let rows: Vec<Subscription> = match (person, project) {
        (Some(person), _) => subscriptions.list_by_person(&person).await?,
        (None, Some(project)) => subscriptions.list_by_project(&project).await?,
        (None, None) => subscriptions.list_all(None).await?,
      };
      emit_all(rows.into_iter().take(limit.unwrap_or(usize::MAX)))?;
    }
    Command::Approve { id } => emit(&engine.approve(actor, &id).await?)?,
    Command::Decline { id } => emit(&engine.decline(actor, &id).await?)?,
    Command::Reconcile { apply } => {
      let report = engine.reconcile_duplicates(actor, !apply).await?;
      emit(&report)?;
      if !report.failures.is_empty() {
        anyhow::bail!("{} duplicates could not be retired", report.failures.len());
      }
    }
    Command::DeletePerson { id } => {
      let report = engine.delete_person(actor, &id).await?;
      emit(&report)?;
      if !report.is_complete() {
        anyhow::bail!("person {id} was only partially deleted");
      }
    }
    Command::Unlock { person_id } => engine.audit().unlock(actor, &person_id).await?,
    Command::Audit => emit_all(engine.audit().recent(limit.unwrap_or(20)).await?)?,
  }
  Ok(())
}

fn emit<T: Serialize>(value: &T) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string(value)?);
  Ok(())
}

fn emit_all<T: Serialize>(rows: impl IntoIterator<Item = T>) -> anyhow::Result<()> {
  for row in rows {
    emit(&row)?;
  }
  Ok(())
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

//! [`SqliteStore`]: the SQLite implementation of [`ItemStore`].

use std::{path::Path, time::Duration};

use registry_core::{
  store::{Filter, Item, ItemKey, ItemStore, PutMode, Table},
  update::UpdateInstruction,
};
use rusqlite::OptionalExtension as _;

use crate::{
  Error, Result,
  encode::{ScanQuery, decode_body, encode_body, item_key, scan_query},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// An item store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:       tokio_rusqlite::Connection,
  op_timeout: Option<Duration>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn, op_timeout: None };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store; useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn, op_timeout: None };
    store.init_schema().await?;
    Ok(store)
  }

  /// Fail any single operation that takes longer than `limit`.
  ///
  /// The deadline only stops the caller waiting. A closure already queued on
  /// the connection thread still runs and may commit, so a
  /// [`Error::Timeout`] does not mean the write was not applied; a retried
  /// create can come back as a conflict.
  pub fn with_op_timeout(mut self, limit: Duration) -> Self {
    self.op_timeout = Some(limit);
    self
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .call("init_schema", |conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await
  }

  /// Run `f` on the connection thread, bounded by the operation timeout.
  async fn call<T, F>(&self, operation: &'static str, f: F) -> Result<T>
  where
    F: FnOnce(&mut rusqlite::Connection) -> tokio_rusqlite::Result<T> + Send + 'static,
    T: Send + 'static,
  {
    let call = self.conn.call(f);
    match self.op_timeout {
      Some(after) => match tokio::time::timeout(after, call).await {
        Ok(result) => Ok(result?),
        Err(_) => {
          tracing::warn!(operation, ?after, "sqlite operation timed out");
          Err(Error::Timeout { operation, after })
        }
      },
      None => Ok(call.await?),
    }
  }
}

impl ItemStore for SqliteStore {
  type Error = Error;

  async fn put_item(&self, table: Table, item: Item, mode: PutMode) -> Result<()> {
    let key = item_key(table, &item)?;
    let body = encode_body(&item)?;
    let table_name = table.to_string();
    let key_param = key.clone();

    let inserted = self
      .call("put_item", move |conn| {
        let sql = match mode {
          PutMode::Create => {
            "INSERT INTO items (table_name, item_key, body) VALUES (?1, ?2, ?3)
             ON CONFLICT (table_name, item_key) DO NOTHING"
          }
          PutMode::Replace => {
            "INSERT INTO items (table_name, item_key, body) VALUES (?1, ?2, ?3)
             ON CONFLICT (table_name, item_key) DO UPDATE SET body = excluded.body"
          }
        };
        let changed = conn.execute(sql, rusqlite::params![table_name, key_param, body])?;
        Ok(changed > 0)
      })
      .await?;

    if inserted {
      Ok(())
    } else {
      Err(Error::ConditionFailed { table, key })
    }
  }

  async fn get_item(&self, table: Table, key: String) -> Result<Option<Item>> {
    let table_name = table.to_string();
    let key_param = key.clone();

    let body: Option<String> = self
      .call("get_item", move |conn| {
        let body = conn
          .query_row(
            "SELECT body FROM items WHERE table_name = ?1 AND item_key = ?2",
            rusqlite::params![table_name, key_param],
            |r| r.get(0),
          )
          .optional()?;
        Ok(body)
      })
      .await?;

    body.map(|raw| decode_body(table, &key, &raw)).transpose()
  }

  async fn update_item(
    &self,
    table: Table,
    key: String,
    instruction: UpdateInstruction,
  ) -> Result<Option<Item>> {
    let table_name = table.to_string();

    // Read-modify-write inside one transaction. Decoding errors are carried
    // out as the inner result so the transaction rolls back on drop.
    let outcome: Result<Option<Item>> = self
      .call("update_item", move |conn| {
        let tx = conn.transaction()?;
        let body: Option<String> = tx
          .query_row(
            "SELECT body FROM items WHERE table_name = ?1 AND item_key = ?2",
            rusqlite::params![table_name, key],
            |r| r.get(0),
          )
          .optional()?;
        let Some(raw) = body else {
          return Ok(Ok(None));
        };

        let mut item = match decode_body(table, &key, &raw) {
          Ok(item) => item,
          Err(e) => return Ok(Err(e)),
        };
        instruction.apply_to(&mut item);
        let encoded = match encode_body(&item) {
          Ok(encoded) => encoded,
          Err(e) => return Ok(Err(e)),
        };

        tx.execute(
          "UPDATE items SET body = ?3 WHERE table_name = ?1 AND item_key = ?2",
          rusqlite::params![table_name, key, encoded],
        )?;
        tx.commit()?;
        Ok(Ok(Some(item)))
      })
      .await?;

    outcome
  }

  async fn delete_item(&self, table: Table, key: String) -> Result<bool> {
    let table_name = table.to_string();
    self
      .call("delete_item", move |conn| {
        let removed = conn.execute(
          "DELETE FROM items WHERE table_name = ?1 AND item_key = ?2",
          rusqlite::params![table_name, key],
        )?;
        Ok(removed > 0)
      })
      .await
  }

  async fn scan(
    &self,
    table: Table,
    filters: Vec<Filter>,
    limit: Option<usize>,
  ) -> Result<Vec<Item>> {
    let ScanQuery { sql, params } = scan_query(table, &filters, limit);

    let rows: Vec<(String, String)> = self
      .call("scan", move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok((row.get(0)?, row.get(1)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut items = Vec::with_capacity(rows.len());
    for (key, body) in rows {
      match decode_body(table, &key, &body) {
        Ok(item) => items.push(item),
        Err(e) => tracing::warn!(%table, %key, error = %e, "skipping undecodable row"),
      }
    }
    Ok(items)
  }

  async fn delete_atomically(&self, keys: Vec<ItemKey>) -> Result<bool> {
    let keys: Vec<(String, String)> = keys
      .into_iter()
      .map(|k| (k.table.to_string(), k.key))
      .collect();

    self
      .call("delete_atomically", move |conn| {
        let tx = conn.transaction()?;
        {
          let mut stmt =
            tx.prepare("DELETE FROM items WHERE table_name = ?1 AND item_key = ?2")?;
          for (table_name, key) in &keys {
            stmt.execute(rusqlite::params![table_name, key])?;
          }
        }
        tx.commit()?;
        Ok(true)
      })
      .await
  }
}

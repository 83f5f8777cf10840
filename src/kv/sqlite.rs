//! SQLite-backed key-value store.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use super::KeyValueStore;

const KV_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Key-value store persisted in a single SQLite table.
pub struct SqliteKvStore {
  conn: Mutex<Connection>,
}

impl SqliteKvStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create storage directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open key-value store at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory store.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(KV_SCHEMA)
      .map_err(|e| eyre!("Failed to run key-value migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl KeyValueStore for SqliteKvStore {
  fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT value FROM kv WHERE key = ?")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let mut found = HashMap::new();
    for key in keys {
      let raw: Option<String> = stmt
        .query_row(params![key], |row| row.get(0))
        .optional()
        .map_err(|e| eyre!("Failed to read key {}: {}", key, e))?;

      if let Some(raw) = raw {
        let value: Value = serde_json::from_str(&raw)
          .map_err(|e| eyre!("Failed to parse stored value for {}: {}", key, e))?;
        found.insert(key.to_string(), value);
      }
    }

    Ok(found)
  }

  fn set_many(&self, entries: &[(&str, Value)]) -> Result<()> {
    let mut conn = self.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for (key, value) in entries {
      let raw =
        serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize {}: {}", key, e))?;
      tx.execute(
        "INSERT OR REPLACE INTO kv (key, value) VALUES (?, ?)",
        params![key, raw],
      )
      .map_err(|e| eyre!("Failed to write key {}: {}", key, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn remove(&self, keys: &[&str]) -> Result<()> {
    let conn = self.lock()?;
    for key in keys {
      conn
        .execute("DELETE FROM kv WHERE key = ?", params![key])
        .map_err(|e| eyre!("Failed to delete key {}: {}", key, e))?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_values_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kv.db");

    {
      let store = SqliteKvStore::open(&path).unwrap();
      store
        .set_many(&[("timerIsRunning", json!(true)), ("timerComment", json!("hi"))])
        .unwrap();
    }

    let store = SqliteKvStore::open(&path).unwrap();
    let got = store
      .get_many(&["timerIsRunning", "timerComment", "missing"])
      .unwrap();

    assert_eq!(got.len(), 2);
    assert_eq!(got["timerIsRunning"], json!(true));
    assert_eq!(got["timerComment"], json!("hi"));
  }

  #[test]
  fn test_overwrite_and_remove() {
    let store = SqliteKvStore::open_in_memory().unwrap();
    store.set_many(&[("k", json!(1))]).unwrap();
    store.set_many(&[("k", json!(2))]).unwrap();
    assert_eq!(store.get_many(&["k"]).unwrap()["k"], json!(2));

    store.remove(&["k", "never-set"]).unwrap();
    assert!(store.get_many(&["k"]).unwrap().is_empty());
  }
}

//! Cache storage trait and SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Trait for cache storage backends.
///
/// Records are JSON objects keyed by id within a collection. Metadata records
/// live in their own keyspace.
pub trait CacheStorage: Send + Sync {
  /// Replace every record in a collection and write its metadata record, as
  /// one unit. Readers see either the previous set or the new one.
  fn replace_collection(
    &self,
    collection: &str,
    records: &[(String, Value)],
    metadata_key: &str,
    metadata: &Value,
  ) -> Result<()>;

  /// All records of a collection in the order they were written.
  fn get_all(&self, collection: &str) -> Result<Vec<Value>>;

  /// A single record by id.
  fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>>;

  /// Records whose `field` equals `value`, in write order.
  fn search(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<Value>>;

  /// Number of records in a collection.
  fn count(&self, collection: &str) -> Result<usize>;

  /// A metadata record by key.
  fn get_metadata(&self, key: &str) -> Result<Option<Value>>;

  /// Remove all records of the given collections and all metadata.
  fn clear(&self, collections: &[&str]) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when the cache database cannot be opened - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn replace_collection(
    &self,
    _collection: &str,
    _records: &[(String, Value)],
    _metadata_key: &str,
    _metadata: &Value,
  ) -> Result<()> {
    Ok(()) // Discard
  }

  fn get_all(&self, _collection: &str) -> Result<Vec<Value>> {
    Ok(Vec::new()) // Always miss
  }

  fn get_by_id(&self, _collection: &str, _id: &str) -> Result<Option<Value>> {
    Ok(None)
  }

  fn search(&self, _collection: &str, _field: &str, _value: &Value) -> Result<Vec<Value>> {
    Ok(Vec::new())
  }

  fn count(&self, _collection: &str) -> Result<usize> {
    Ok(0)
  }

  fn get_metadata(&self, _key: &str) -> Result<Option<Value>> {
    Ok(None) // No cached data
  }

  fn clear(&self, _collections: &[&str]) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the cache database inside `data_dir`.
  pub fn open(data_dir: &Path) -> Result<Self> {
    let path = Self::path_in(data_dir);

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(&path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory cache.
  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn path_in(data_dir: &Path) -> PathBuf {
    data_dir.join("cache.db")
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- Cached records (serialized JSON), ordered by position within a collection
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    record_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (collection, record_id)
);

CREATE INDEX IF NOT EXISTS idx_records_position
    ON records(collection, position);

-- One metadata record per collection, keyed "{collection}_lastUpdate"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL
);
"#;

impl CacheStorage for SqliteStorage {
  fn replace_collection(
    &self,
    collection: &str,
    records: &[(String, Value)],
    metadata_key: &str,
    metadata: &Value,
  ) -> Result<()> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    // Delete existing records
    tx.execute(
      "DELETE FROM records WHERE collection = ?",
      params![collection],
    )
    .map_err(|e| eyre!("Failed to clear {}: {}", collection, e))?;

    for (position, (id, record)) in records.iter().enumerate() {
      let data = serde_json::to_string(record)
        .map_err(|e| eyre!("Failed to serialize record {}: {}", id, e))?;

      tx.execute(
        "INSERT OR REPLACE INTO records (collection, record_id, position, data)
         VALUES (?, ?, ?, ?)",
        params![collection, id, position as i64, data],
      )
      .map_err(|e| eyre!("Failed to store record {}: {}", id, e))?;
    }

    let metadata = serde_json::to_string(metadata)
      .map_err(|e| eyre!("Failed to serialize metadata: {}", e))?;
    tx.execute(
      "INSERT OR REPLACE INTO metadata (key, data) VALUES (?, ?)",
      params![metadata_key, metadata],
    )
    .map_err(|e| eyre!("Failed to update metadata: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn get_all(&self, collection: &str) -> Result<Vec<Value>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT data FROM records WHERE collection = ? ORDER BY position")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![collection], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to query {}: {}", collection, e))?;

    collect_records(rows)
  }

  fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>> {
    let conn = self.lock()?;

    let data: Option<String> = conn
      .query_row(
        "SELECT data FROM records WHERE collection = ? AND record_id = ?",
        params![collection, id],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to get record {} from {}: {}", id, collection, e))?;

    data
      .map(|d| serde_json::from_str(&d).map_err(|e| eyre!("Failed to parse record {}: {}", id, e)))
      .transpose()
  }

  fn search(&self, collection: &str, field: &str, value: &Value) -> Result<Vec<Value>> {
    let conn = self.lock()?;
    let path = format!("$.{}", field);
    let needle = sql_value(value)?;

    let mut stmt = conn
      .prepare(
        "SELECT data FROM records
         WHERE collection = ? AND json_extract(data, ?) = ?
         ORDER BY position",
      )
      .map_err(|e| eyre!("Failed to prepare search: {}", e))?;

    let rows = stmt
      .query_map(params![collection, path, needle], |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to search {}: {}", collection, e))?;

    collect_records(rows)
  }

  fn count(&self, collection: &str) -> Result<usize> {
    let conn = self.lock()?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM records WHERE collection = ?",
        params![collection],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count {}: {}", collection, e))?;

    Ok(count as usize)
  }

  fn get_metadata(&self, key: &str) -> Result<Option<Value>> {
    let conn = self.lock()?;

    let data: Option<String> = conn
      .query_row(
        "SELECT data FROM metadata WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to get metadata {}: {}", key, e))?;

    data
      .map(|d| serde_json::from_str(&d).map_err(|e| eyre!("Failed to parse metadata {}: {}", key, e)))
      .transpose()
  }

  fn clear(&self, collections: &[&str]) -> Result<()> {
    let mut conn = self.lock()?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for collection in collections {
      tx.execute(
        "DELETE FROM records WHERE collection = ?",
        params![collection],
      )
      .map_err(|e| eyre!("Failed to clear {}: {}", collection, e))?;
    }
    tx.execute("DELETE FROM metadata", [])
      .map_err(|e| eyre!("Failed to clear metadata: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

fn collect_records(
  rows: impl Iterator<Item = rusqlite::Result<String>>,
) -> Result<Vec<Value>> {
  rows
    .map(|row| {
      let data = row.map_err(|e| eyre!("Failed to read record: {}", e))?;
      serde_json::from_str(&data).map_err(|e| eyre!("Failed to parse record: {}", e))
    })
    .collect()
}

/// Convert a JSON scalar to the value `json_extract` yields for it.
fn sql_value(value: &Value) -> Result<rusqlite::types::Value> {
  use rusqlite::types::Value as Sql;

  match value {
    Value::String(s) => Ok(Sql::Text(s.clone())),
    Value::Bool(b) => Ok(Sql::Integer(i64::from(*b))),
    Value::Number(n) => match n.as_i64() {
      Some(i) => Ok(Sql::Integer(i)),
      None => n
        .as_f64()
        .map(Sql::Real)
        .ok_or_else(|| eyre!("Unsupported number {}", n)),
    },
    Value::Null => Ok(Sql::Null),
    other => Err(eyre!("Cannot search by non-scalar value {}", other)),
  }
}

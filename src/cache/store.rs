//! The local cache store used by UI-side callers.
//!
//! Every operation absorbs storage errors: failures are logged and reported
//! as `false`, an empty list or `None`, so callers can always fall back to
//! the network.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::clock::{from_millis, to_millis, Clock};

use super::schema::{self, CollectionSchema, COLLECTIONS};
use super::storage::CacheStorage;

/// Per-collection statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionStats {
  pub count: usize,
  pub last_update: Option<DateTime<Utc>>,
  /// Milliseconds since the last write
  #[serde(rename = "age")]
  pub age_ms: Option<i64>,
}

/// Replace-on-write cache of named collections with freshness tracking.
#[derive(Clone)]
pub struct CacheStore {
  storage: Arc<dyn CacheStorage>,
  clock: Arc<dyn Clock>,
  /// One writer lock per collection so refills never interleave
  write_locks: Arc<Mutex<HashMap<&'static str, Arc<tokio::sync::Mutex<()>>>>>,
}

impl CacheStore {
  pub fn new(storage: Arc<dyn CacheStorage>, clock: Arc<dyn Clock>) -> Self {
    Self {
      storage,
      clock,
      write_locks: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Replace every record of `collection` with `items`.
  ///
  /// The metadata record gets `timestamp` (epoch ms) and `count`, plus the
  /// fields of `extra`. Returns `false` if nothing was written.
  pub async fn put(&self, collection: &str, items: Vec<Value>, extra: Map<String, Value>) -> bool {
    match self.try_put(collection, items, extra).await {
      Ok(count) => {
        debug!(collection, count, "Cache updated");
        true
      }
      Err(e) => {
        warn!(collection, error = %e, "Failed to cache collection");
        false
      }
    }
  }

  async fn try_put(
    &self,
    collection: &str,
    items: Vec<Value>,
    extra: Map<String, Value>,
  ) -> Result<usize> {
    let schema = known(collection)?;
    let records = items
      .into_iter()
      .map(|item| record_id(&item).map(|id| (id, item)))
      .collect::<Result<Vec<_>>>()?;
    let count = records.len();

    let writer = self.writer(schema)?;
    let _guard = writer.lock().await;

    let mut metadata = Map::new();
    metadata.insert("key".into(), json!(schema::metadata_key(schema.name)));
    metadata.insert("timestamp".into(), json!(to_millis(self.clock.now())));
    metadata.insert("count".into(), json!(count));
    metadata.extend(extra);
    let metadata = Value::Object(metadata);

    let name = schema.name;
    self
      .blocking(move |storage| {
        storage.replace_collection(name, &records, &schema::metadata_key(name), &metadata)
      })
      .await?;

    Ok(count)
  }

  /// All cached records of a collection, in write order.
  pub async fn get_all(&self, collection: &str) -> Vec<Value> {
    let result = match known(collection) {
      Ok(schema) => {
        let name = schema.name;
        self.blocking(move |storage| storage.get_all(name)).await
      }
      Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
      warn!(collection, error = %e, "Failed to read cache");
      Vec::new()
    })
  }

  /// The record with the given id, if cached.
  pub async fn get_by_id(&self, collection: &str, id: &str) -> Option<Value> {
    let result = match known(collection) {
      Ok(schema) => {
        let name = schema.name;
        let id = id.to_string();
        self.blocking(move |storage| storage.get_by_id(name, &id)).await
      }
      Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
      warn!(collection, id, error = %e, "Failed to read cached record");
      None
    })
  }

  /// Records whose indexed field equals `query`.
  pub async fn search_by_index(&self, collection: &str, index: &str, query: &Value) -> Vec<Value> {
    let result = match known(collection) {
      Ok(schema) if schema.has_index(index) => {
        let name = schema.name;
        let index = index.to_string();
        let query = query.clone();
        self
          .blocking(move |storage| storage.search(name, &index, &query))
          .await
      }
      Ok(_) => Err(eyre!("Collection {} has no index {}", collection, index)),
      Err(e) => Err(e),
    };

    result.unwrap_or_else(|e| {
      warn!(collection, index, error = %e, "Failed to search cache");
      Vec::new()
    })
  }

  /// When the collection was last written, if ever.
  pub async fn last_update(&self, collection: &str) -> Option<DateTime<Utc>> {
    let key = schema::metadata_key(collection);
    let result = self.blocking(move |storage| storage.get_metadata(&key)).await;

    match result {
      Ok(metadata) => metadata
        .and_then(|m| m.get("timestamp").and_then(Value::as_i64))
        .and_then(from_millis),
      Err(e) => {
        warn!(collection, error = %e, "Failed to read cache metadata");
        None
      }
    }
  }

  /// Whether the collection was written less than `max_age` ago.
  pub async fn is_fresh(&self, collection: &str, max_age: Duration) -> bool {
    match self.last_update(collection).await {
      Some(at) => self.clock.now() - at < max_age,
      None => false,
    }
  }

  /// Empty every known collection and the metadata.
  pub async fn clear_all(&self) -> bool {
    let names: Vec<&'static str> = COLLECTIONS.iter().map(|c| c.name).collect();
    match self.blocking(move |storage| storage.clear(&names)).await {
      Ok(()) => {
        debug!("Cache cleared");
        true
      }
      Err(e) => {
        warn!(error = %e, "Failed to clear cache");
        false
      }
    }
  }

  /// Count, last write and age for each known collection.
  pub async fn stats(&self) -> BTreeMap<&'static str, CollectionStats> {
    let now = self.clock.now();

    let per_collection = COLLECTIONS.iter().map(|collection| async move {
      let name = collection.name;
      let count = self
        .blocking(move |storage| storage.count(name))
        .await
        .unwrap_or_else(|e| {
          warn!(collection = name, error = %e, "Failed to count cached records");
          0
        });
      let last_update = self.last_update(name).await;

      (
        name,
        CollectionStats {
          count,
          last_update,
          age_ms: last_update.map(|at| (now - at).num_milliseconds()),
        },
      )
    });

    join_all(per_collection).await.into_iter().collect()
  }

  fn writer(&self, schema: &'static CollectionSchema) -> Result<Arc<tokio::sync::Mutex<()>>> {
    let mut locks = self
      .write_locks
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(Arc::clone(locks.entry(schema.name).or_default()))
  }

  /// Run a storage call off the async threads.
  async fn blocking<R, F>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&dyn CacheStorage) -> Result<R> + Send + 'static,
    R: Send + 'static,
  {
    let storage = Arc::clone(&self.storage);
    tokio::task::spawn_blocking(move || f(storage.as_ref()))
      .await
      .map_err(|e| eyre!("Cache task failed: {}", e))?
  }
}

fn known(collection: &str) -> Result<&'static CollectionSchema> {
  schema::find(collection).ok_or_else(|| eyre!("Unknown cache collection {}", collection))
}

/// The key a record is stored under: its `id` field.
fn record_id(record: &Value) -> Result<String> {
  match record.get("id") {
    Some(Value::String(s)) => Ok(s.clone()),
    Some(Value::Number(n)) => Ok(n.to_string()),
    _ => Err(eyre!("Record has no usable id: {}", record)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStorage;
  use crate::clock::ManualClock;

  fn store() -> (CacheStore, ManualClock) {
    let clock = ManualClock::new(from_millis(1_700_000_000_000).unwrap());
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    (CacheStore::new(storage, Arc::new(clock.clone())), clock)
  }

  struct BrokenStorage;

  impl CacheStorage for BrokenStorage {
    fn replace_collection(&self, _: &str, _: &[(String, Value)], _: &str, _: &Value) -> Result<()> {
      Err(eyre!("database is locked"))
    }
    fn get_all(&self, _: &str) -> Result<Vec<Value>> {
      Err(eyre!("database is locked"))
    }
    fn get_by_id(&self, _: &str, _: &str) -> Result<Option<Value>> {
      Err(eyre!("database is locked"))
    }
    fn search(&self, _: &str, _: &str, _: &Value) -> Result<Vec<Value>> {
      Err(eyre!("database is locked"))
    }
    fn count(&self, _: &str) -> Result<usize> {
      Err(eyre!("database is locked"))
    }
    fn get_metadata(&self, _: &str) -> Result<Option<Value>> {
      Err(eyre!("database is locked"))
    }
    fn clear(&self, _: &[&str]) -> Result<()> {
      Err(eyre!("database is locked"))
    }
  }

  #[tokio::test]
  async fn test_put_replaces_whole_collection() {
    let (store, _) = store();
    let a = json!({"id": 1, "subject": "A"});
    let b = json!({"id": 2, "subject": "B"});
    let c = json!({"id": 3, "subject": "C"});
    let d = json!({"id": 4, "subject": "D"});

    assert!(store.put("workPackages", vec![a, b, c], Map::new()).await);
    assert!(store.put("workPackages", vec![d.clone()], Map::new()).await);

    assert_eq!(store.get_all("workPackages").await, vec![d]);
  }

  #[tokio::test]
  async fn test_freshness_boundary() {
    let (store, clock) = store();
    store.put("projects", vec![json!({"id": 1})], Map::new()).await;

    clock.advance(Duration::milliseconds(999));
    assert!(store.is_fresh("projects", Duration::milliseconds(1000)).await);

    clock.advance(Duration::milliseconds(2));
    assert!(!store.is_fresh("projects", Duration::milliseconds(1000)).await);
  }

  #[tokio::test]
  async fn test_never_written_is_not_fresh() {
    let (store, _) = store();
    assert!(!store.is_fresh("worklogs", Duration::hours(1)).await);
  }

  #[tokio::test]
  async fn test_get_by_id_and_search() {
    let (store, _) = store();
    store
      .put(
        "worklogs",
        vec![
          json!({"id": "a", "spentOn": "2026-10-17", "workPackageId": 42}),
          json!({"id": "b", "spentOn": "2026-10-16", "workPackageId": 42}),
        ],
        Map::new(),
      )
      .await;

    assert_eq!(
      store.get_by_id("worklogs", "b").await.unwrap()["spentOn"],
      json!("2026-10-16")
    );
    assert!(store.get_by_id("worklogs", "zzz").await.is_none());

    let today = store
      .search_by_index("worklogs", "spentOn", &json!("2026-10-17"))
      .await;
    assert_eq!(today.len(), 1);

    // Not a declared index
    assert!(store
      .search_by_index("worklogs", "comment", &json!("x"))
      .await
      .is_empty());
  }

  #[tokio::test]
  async fn test_metadata_includes_extra_fields() {
    let (store, _) = store();
    let mut extra = Map::new();
    extra.insert("query".into(), json!("status=open"));
    store.put("workPackages", vec![json!({"id": 1})], extra).await;

    let metadata = store
      .storage
      .get_metadata("workPackages_lastUpdate")
      .unwrap()
      .unwrap();
    assert_eq!(metadata["count"], json!(1));
    assert_eq!(metadata["query"], json!("status=open"));
    assert_eq!(metadata["timestamp"], json!(1_700_000_000_000i64));
  }

  #[tokio::test]
  async fn test_put_rejects_unknown_collection_and_missing_ids() {
    let (store, _) = store();
    assert!(!store.put("boards", vec![json!({"id": 1})], Map::new()).await);
    assert!(!store.put("projects", vec![json!({"name": "x"})], Map::new()).await);
    assert!(store.get_all("projects").await.is_empty());
  }

  #[tokio::test]
  async fn test_stats_and_clear_all() {
    let (store, clock) = store();
    store
      .put("projects", vec![json!({"id": 1}), json!({"id": 2})], Map::new())
      .await;
    clock.advance(Duration::seconds(3));

    let stats = store.stats().await;
    assert_eq!(stats["projects"].count, 2);
    assert_eq!(stats["projects"].age_ms, Some(3000));
    assert_eq!(stats["worklogs"].count, 0);
    assert_eq!(stats["worklogs"].last_update, None);

    let reported = serde_json::to_value(&stats["projects"]).unwrap();
    assert_eq!(reported["count"], json!(2));
    assert_eq!(reported["age"], json!(3000));
    assert!(reported.get("lastUpdate").is_some());

    assert!(store.clear_all().await);
    let stats = store.stats().await;
    assert_eq!(stats["projects"].count, 0);
    assert!(!store.is_fresh("projects", Duration::hours(1)).await);
  }

  #[tokio::test]
  async fn test_concurrent_puts_never_mix() {
    let (store, _) = store();
    let first: Vec<Value> = (0..50).map(|i| json!({"id": i, "batch": "first"})).collect();
    let second: Vec<Value> = (100..120).map(|i| json!({"id": i, "batch": "second"})).collect();

    let (a, b) = tokio::join!(
      store.put("workPackages", first.clone(), Map::new()),
      store.put("workPackages", second.clone(), Map::new()),
    );
    assert!(a && b);

    let all = store.get_all("workPackages").await;
    assert!(all == first || all == second);
  }

  #[tokio::test]
  async fn test_storage_errors_are_absorbed() {
    let clock = ManualClock::new(from_millis(0).unwrap());
    let store = CacheStore::new(Arc::new(BrokenStorage), Arc::new(clock));

    assert!(!store.put("projects", vec![json!({"id": 1})], Map::new()).await);
    assert!(store.get_all("projects").await.is_empty());
    assert!(store.get_by_id("projects", "1").await.is_none());
    assert!(store
      .search_by_index("workPackages", "subject", &json!("x"))
      .await
      .is_empty());
    assert!(!store.is_fresh("projects", Duration::hours(1)).await);
    assert!(!store.clear_all().await);
    assert_eq!(store.stats().await["projects"].count, 0);
  }
}

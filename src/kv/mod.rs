//! Durable key-value storage.
//!
//! Values are JSON documents addressed by string keys, in the style of a
//! browser extension's local storage area. The timer service is the only
//! writer of its keys.

mod sqlite;

pub use sqlite::SqliteKvStore;

use color_eyre::Result;
use serde_json::Value;
use std::collections::HashMap;

/// Trait for key-value storage backends.
pub trait KeyValueStore: Send + Sync {
  /// Fetch the given keys. Keys that are not stored are absent from the map.
  fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Value>>;

  /// Write all entries as a single unit.
  fn set_many(&self, entries: &[(&str, Value)]) -> Result<()>;

  /// Remove the given keys. Missing keys are ignored.
  fn remove(&self, keys: &[&str]) -> Result<()>;
}

/// In-process store, used in tests and when no data directory is available.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
  entries: std::sync::Mutex<HashMap<String, Value>>,
}

impl MemoryKvStore {
  #[cfg(test)]
  pub fn with_entries(entries: impl IntoIterator<Item = (&'static str, Value)>) -> Self {
    Self {
      entries: std::sync::Mutex::new(
        entries
          .into_iter()
          .map(|(k, v)| (k.to_string(), v))
          .collect(),
      ),
    }
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>> {
    self
      .entries
      .lock()
      .map_err(|e| color_eyre::eyre::eyre!("Lock poisoned: {}", e))
  }
}

impl KeyValueStore for MemoryKvStore {
  fn get_many(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
    let entries = self.lock()?;
    Ok(
      keys
        .iter()
        .filter_map(|k| entries.get(*k).map(|v| (k.to_string(), v.clone())))
        .collect(),
    )
  }

  fn set_many(&self, new_entries: &[(&str, Value)]) -> Result<()> {
    let mut entries = self.lock()?;
    for (key, value) in new_entries {
      entries.insert(key.to_string(), value.clone());
    }
    Ok(())
  }

  fn remove(&self, keys: &[&str]) -> Result<()> {
    let mut entries = self.lock()?;
    for key in keys {
      entries.remove(*key);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_memory_store_roundtrip() {
    let store = MemoryKvStore::default();
    store
      .set_many(&[("a", json!(1)), ("b", json!("two"))])
      .unwrap();

    let got = store.get_many(&["a", "b", "c"]).unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got["b"], json!("two"));

    store.remove(&["a"]).unwrap();
    assert!(store.get_many(&["a"]).unwrap().is_empty());
  }
}

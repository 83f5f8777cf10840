//! Cache layer that orchestrates caching logic with network fetching.

use chrono::Duration;
use color_eyre::Result;
use serde_json::{Map, Value};
use std::future::Future;
use tracing::{debug, warn};

use super::store::CacheStore;
use super::traits::{CacheResult, Cacheable};

/// Cache layer that manages caching logic and network fetching.
///
/// This layer sits between the application and the network client,
/// providing transparent caching with offline support.
#[derive(Clone)]
pub struct CacheLayer {
  store: CacheStore,
  /// How long before cached data is considered stale
  max_age: Duration,
}

impl CacheLayer {
  /// Create a new cache layer over the given store.
  pub fn new(store: CacheStore) -> Self {
    Self {
      store,
      max_age: Duration::minutes(5),
    }
  }

  /// Set the max age for cached data.
  pub fn with_max_age(mut self, max_age: Duration) -> Self {
    self.max_age = max_age;
    self
  }

  /// Fetch a collection with cache-first strategy.
  ///
  /// 1. Check cache - if fresh, return immediately
  /// 2. If stale/missing, fetch from network
  /// 3. On network failure, return stale cache (offline mode)
  /// 4. Replace the cached collection with new data
  pub async fn fetch_list<T, F, Fut>(&self, fetcher: F) -> Result<CacheResult<Vec<T>>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    let collection = T::collection();
    let cached_at = self.store.last_update(collection).await;

    if let Some(cached_at) = cached_at {
      if self.store.is_fresh(collection, self.max_age).await {
        debug!(collection, "Serving fresh cache");
        return Ok(CacheResult::from_cache(self.cached::<T>().await, cached_at));
      }
    }

    match fetcher().await {
      Ok(data) => {
        self.store_list(&data).await;
        Ok(CacheResult::from_network(data))
      }
      Err(e) => match cached_at {
        Some(cached_at) => {
          warn!(collection, error = %e, "Network fetch failed, serving stale cache");
          Ok(CacheResult::offline(self.cached::<T>().await, cached_at))
        }
        None => Err(e),
      },
    }
  }

  /// Fetch the records matching one index value, network first.
  ///
  /// A successful fetch replaces the cached collection and records the
  /// filter in its metadata. When the network fails, matching records are
  /// looked up in whatever is cached.
  pub async fn fetch_by_index<T, F, Fut>(
    &self,
    index: &str,
    value: Value,
    fetcher: F,
  ) -> Result<CacheResult<Vec<T>>>
  where
    T: Cacheable,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
  {
    let collection = T::collection();

    match fetcher().await {
      Ok(data) => {
        let mut extra = Map::new();
        extra.insert(index.to_string(), value);
        self.store_list_with(&data, extra).await;
        Ok(CacheResult::from_network(data))
      }
      Err(e) => match self.store.last_update(collection).await {
        Some(cached_at) => {
          warn!(collection, index, error = %e, "Network fetch failed, searching cache");
          let data = self
            .store
            .search_by_index(collection, index, &value)
            .await
            .into_iter()
            .filter_map(|value| serde_json::from_value(value).ok())
            .collect();
          Ok(CacheResult::offline(data, cached_at))
        }
        None => Err(e),
      },
    }
  }

  async fn cached<T: Cacheable>(&self) -> Vec<T> {
    self
      .store
      .get_all(T::collection())
      .await
      .into_iter()
      .filter_map(|value| serde_json::from_value(value).ok())
      .collect()
  }

  async fn store_list<T: Cacheable>(&self, data: &[T]) {
    self.store_list_with(data, Map::new()).await;
  }

  async fn store_list_with<T: Cacheable>(&self, data: &[T], extra: Map<String, Value>) {
    let values: Vec<Value> = data
      .iter()
      .filter_map(|item| serde_json::to_value(item).ok())
      .collect();
    // Failures are logged by the store
    self.store.put(T::collection(), values, extra).await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::SqliteStorage;
  use crate::cache::traits::CacheSource;
  use crate::clock::{from_millis, ManualClock};
  use color_eyre::eyre::eyre;
  use serde::{Deserialize, Serialize};
  use std::sync::Arc;

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  struct Project {
    id: u64,
    name: String,
  }

  impl Cacheable for Project {
    fn collection() -> &'static str {
      "projects"
    }
  }

  fn project(id: u64, name: &str) -> Project {
    Project {
      id,
      name: name.into(),
    }
  }

  fn layer() -> (CacheLayer, ManualClock) {
    let clock = ManualClock::new(from_millis(1_700_000_000_000).unwrap());
    let storage = Arc::new(SqliteStorage::open_in_memory().unwrap());
    let store = CacheStore::new(storage, Arc::new(clock.clone()));
    (CacheLayer::new(store).with_max_age(Duration::minutes(5)), clock)
  }

  #[tokio::test]
  async fn test_miss_then_fresh_hit() {
    let (layer, _) = layer();

    let first = layer
      .fetch_list(|| async { Ok(vec![project(1, "Ops")]) })
      .await
      .unwrap();
    assert_eq!(first.source, CacheSource::Network);

    let second = layer
      .fetch_list::<Project, _, _>(|| async { Err(eyre!("should not hit the network")) })
      .await
      .unwrap();
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(second.data, vec![project(1, "Ops")]);
  }

  #[tokio::test]
  async fn test_stale_cache_refetches() {
    let (layer, clock) = layer();
    layer
      .fetch_list(|| async { Ok(vec![project(1, "Ops")]) })
      .await
      .unwrap();

    clock.advance(Duration::minutes(6));
    let result = layer
      .fetch_list(|| async { Ok(vec![project(2, "Dev")]) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(result.data, vec![project(2, "Dev")]);
  }

  #[tokio::test]
  async fn test_offline_serves_stale_cache() {
    let (layer, clock) = layer();
    layer
      .fetch_list(|| async { Ok(vec![project(1, "Ops")]) })
      .await
      .unwrap();

    clock.advance(Duration::hours(1));
    let result = layer
      .fetch_list::<Project, _, _>(|| async { Err(eyre!("connection refused")) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(result.data, vec![project(1, "Ops")]);
    assert!(result.cached_at.is_some());
  }

  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  #[serde(rename_all = "camelCase")]
  struct Worklog {
    id: u64,
    spent_on: String,
  }

  impl Cacheable for Worklog {
    fn collection() -> &'static str {
      "worklogs"
    }
  }

  #[tokio::test]
  async fn test_fetch_by_index_falls_back_to_matching_cache() {
    let (layer, _) = layer();
    let today = Worklog {
      id: 1,
      spent_on: "2026-10-17".into(),
    };
    let yesterday = Worklog {
      id: 2,
      spent_on: "2026-10-16".into(),
    };

    let both = vec![today.clone(), yesterday.clone()];
    layer
      .fetch_by_index("spentOn", serde_json::json!("2026-10-17"), || async move { Ok(both) })
      .await
      .unwrap();

    let offline = layer
      .fetch_by_index::<Worklog, _, _>("spentOn", serde_json::json!("2026-10-17"), || async {
        Err(eyre!("timeout"))
      })
      .await
      .unwrap();

    assert_eq!(offline.source, CacheSource::Offline);
    assert_eq!(offline.data, vec![today]);
  }

  #[tokio::test]
  async fn test_network_error_without_cache_propagates() {
    let (layer, _) = layer();
    let result = layer
      .fetch_list::<Project, _, _>(|| async { Err(eyre!("connection refused")) })
      .await;
    assert!(result.is_err());
  }
}

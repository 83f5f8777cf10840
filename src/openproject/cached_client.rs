//! OpenProject client with transparent caching.

use chrono::NaiveDate;
use color_eyre::Result;
use serde_json::json;

use crate::cache::{CacheLayer, CacheResult};

use super::client::OpenProjectClient;
use super::types::{Project, TimeEntry, WorkPackage};

/// Wraps [`OpenProjectClient`] list calls with the read-through cache, so
/// recently fetched collections are served locally and stale ones are still
/// available when the server cannot be reached.
#[derive(Clone)]
pub struct CachedOpenProjectClient {
  inner: OpenProjectClient,
  cache: CacheLayer,
}

impl CachedOpenProjectClient {
  pub fn new(inner: OpenProjectClient, cache: CacheLayer) -> Self {
    Self { inner, cache }
  }

  pub async fn work_packages(&self) -> Result<CacheResult<Vec<WorkPackage>>> {
    let inner = self.inner.clone();
    self
      .cache
      .fetch_list(|| async move { inner.list_work_packages().await })
      .await
  }

  pub async fn projects(&self) -> Result<CacheResult<Vec<Project>>> {
    let inner = self.inner.clone();
    self
      .cache
      .fetch_list(|| async move { inner.list_projects().await })
      .await
  }

  /// Time entries for one day. Always asks the server first; the cache is
  /// only consulted when the server cannot be reached.
  pub async fn time_entries_on(&self, day: NaiveDate) -> Result<CacheResult<Vec<TimeEntry>>> {
    let inner = self.inner.clone();
    let spent_on = json!(day.format("%Y-%m-%d").to_string());
    self
      .cache
      .fetch_by_index("spentOn", spent_on, || async move {
        inner.list_time_entries_on(day).await
      })
      .await
  }
}

//! Records exchanged with the OpenProject API v3.
//!
//! The API answers in HAL: collections wrap their elements in
//! `_embedded.elements` and relations live under `_links`. The records here
//! are the flattened shapes kept in the cache.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::cache::{self, Cacheable};

use super::duration;

/// Work package summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkPackage {
  pub id: u64,
  pub subject: String,
  pub updated_at: Option<String>,
  pub project: Option<String>,
  pub status: Option<String>,
}

/// Logged time on a work package
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
  pub id: u64,
  pub spent_on: String,
  pub hours: f64,
  pub work_package_id: Option<u64>,
  pub work_package_title: Option<String>,
  pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
  pub id: u64,
  pub name: String,
  pub identifier: Option<String>,
}

impl Cacheable for WorkPackage {
  fn collection() -> &'static str {
    cache::WORK_PACKAGES
  }
}

impl Cacheable for TimeEntry {
  fn collection() -> &'static str {
    cache::WORKLOGS
  }
}

impl Cacheable for Project {
  fn collection() -> &'static str {
    cache::PROJECTS
  }
}

// ============================================================================
// HAL wire types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ApiCollection<T> {
  #[serde(rename = "_embedded", default = "ApiEmbedded::empty")]
  pub embedded: ApiEmbedded<T>,
}

#[derive(Debug, Deserialize)]
pub struct ApiEmbedded<T> {
  #[serde(default = "Vec::new")]
  pub elements: Vec<T>,
}

impl<T> ApiEmbedded<T> {
  fn empty() -> Self {
    Self {
      elements: Vec::new(),
    }
  }
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiLink {
  pub href: Option<String>,
  pub title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLinks {
  #[serde(default)]
  pub project: ApiLink,
  #[serde(default)]
  pub status: ApiLink,
  #[serde(default)]
  pub work_package: ApiLink,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiWorkPackage {
  pub id: u64,
  pub subject: String,
  pub updated_at: Option<String>,
  #[serde(rename = "_links", default)]
  pub links: ApiLinks,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApiFormattable {
  pub raw: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTimeEntry {
  pub id: u64,
  pub spent_on: String,
  pub hours: Option<String>,
  #[serde(default)]
  pub comment: Option<ApiFormattable>,
  #[serde(rename = "_links", default)]
  pub links: ApiLinks,
}

#[derive(Debug, Deserialize)]
pub struct ApiProject {
  pub id: u64,
  pub name: String,
  pub identifier: Option<String>,
}

impl From<ApiWorkPackage> for WorkPackage {
  fn from(api: ApiWorkPackage) -> Self {
    Self {
      id: api.id,
      subject: api.subject,
      updated_at: api.updated_at,
      project: api.links.project.title,
      status: api.links.status.title,
    }
  }
}

impl From<ApiTimeEntry> for TimeEntry {
  fn from(api: ApiTimeEntry) -> Self {
    let work_package = api.links.work_package;
    Self {
      id: api.id,
      spent_on: api.spent_on,
      hours: api.hours.as_deref().map(duration::from_iso8601).unwrap_or(0.0),
      work_package_id: work_package.href.as_deref().and_then(id_from_href),
      work_package_title: work_package.title,
      comment: api.comment.and_then(|c| c.raw).unwrap_or_default(),
    }
  }
}

impl From<ApiProject> for Project {
  fn from(api: ApiProject) -> Self {
    Self {
      id: api.id,
      name: api.name,
      identifier: api.identifier,
    }
  }
}

/// Trailing numeric id of a resource link ("/api/v3/work_packages/42" -> 42).
pub fn id_from_href(href: &str) -> Option<u64> {
  href.trim_end_matches('/').rsplit('/').next()?.parse().ok()
}

/// Request body that creates a time entry on a work package.
pub fn new_time_entry(
  work_package_id: &str,
  spent_on: NaiveDate,
  hours: f64,
  comment: &str,
) -> serde_json::Value {
  serde_json::json!({
    "ongoing": false,
    "spentOn": spent_on.format("%Y-%m-%d").to_string(),
    "hours": duration::to_iso8601(hours),
    "comment": { "raw": comment, "format": "plain" },
    "_links": {
      "workPackage": { "href": format!("/api/v3/work_packages/{}", work_package_id) }
    }
  })
}

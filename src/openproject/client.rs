use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::protocol::HttpMethod;

use super::types::{
  ApiCollection, ApiProject, ApiTimeEntry, ApiWorkPackage, Project, TimeEntry, WorkPackage,
};

const PAGE_SIZE: u32 = 100;

/// OpenProject REST API client.
///
/// Settings are checked on every call, so a client built from an incomplete
/// configuration still works as a value and reports the problem per request.
#[derive(Clone)]
pub struct OpenProjectClient {
  http: reqwest::Client,
  server_url: Option<String>,
  api_key: Option<String>,
}

impl OpenProjectClient {
  pub fn new(config: &Config) -> Result<Self> {
    let http = reqwest::Client::builder()
      .user_agent(concat!("opassist/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      server_url: config.server.url.clone(),
      api_key: config.api_key(),
    })
  }

  fn credentials(&self) -> Result<(Url, &str)> {
    let (Some(server_url), Some(api_key)) = (&self.server_url, &self.api_key) else {
      return Err(eyre!("Server URL and API key must be configured"));
    };

    let base = Url::parse(server_url)
      .map_err(|e| eyre!("Invalid server URL {}: {}", server_url, e))?;

    Ok((base, api_key))
  }

  /// Call an API endpoint and return its parsed JSON body.
  ///
  /// The body is only sent for POST and PATCH. Empty responses (including
  /// 204 No Content) yield `{}`.
  pub async fn make_api_call(
    &self,
    endpoint: &str,
    method: HttpMethod,
    data: Option<&Value>,
  ) -> Result<Value> {
    let (base, api_key) = self.credentials()?;
    let url = join_endpoint(&base, endpoint)?;

    debug!(%url, ?method, "API request");

    let mut request = self
      .http
      .request(method.into(), url)
      .basic_auth("apikey", Some(api_key))
      .header(reqwest::header::CONTENT_TYPE, "application/json");

    if let (Some(data), true) = (data, method.has_body()) {
      let body = serde_json::to_vec(data).map_err(|e| eyre!("Failed to encode body: {}", e))?;
      request = request.body(body);
    }

    let response = request
      .send()
      .await
      .map_err(|e| eyre!("Request to {} failed: {}", endpoint, e))?;

    let status = response.status();
    let text = response
      .text()
      .await
      .map_err(|e| eyre!("Failed to read response from {}: {}", endpoint, e))?;

    if !status.is_success() {
      return Err(eyre!("API Error: {} - {}", status.as_u16(), text));
    }

    parse_body(status, &text)
  }

  /// Work packages visible to the user, most recently updated first.
  pub async fn list_work_packages(&self) -> Result<Vec<WorkPackage>> {
    let endpoint = with_query(
      "/api/v3/work_packages",
      &[
        ("pageSize", PAGE_SIZE.to_string()),
        ("sortBy", json!([["updatedAt", "desc"]]).to_string()),
      ],
    );
    let elements: Vec<ApiWorkPackage> = self.get_collection(&endpoint).await?;
    Ok(elements.into_iter().map(WorkPackage::from).collect())
  }

  /// Time entries logged on a given day.
  pub async fn list_time_entries_on(&self, day: NaiveDate) -> Result<Vec<TimeEntry>> {
    let day = day.format("%Y-%m-%d").to_string();
    let endpoint = with_query(
      "/api/v3/time_entries",
      &[
        (
          "filters",
          json!([{ "spentOn": { "operator": "<>d", "values": [day, day] } }]).to_string(),
        ),
        ("sortBy", json!([["spentOn", "desc"]]).to_string()),
      ],
    );
    let elements: Vec<ApiTimeEntry> = self.get_collection(&endpoint).await?;
    Ok(elements.into_iter().map(TimeEntry::from).collect())
  }

  pub async fn list_projects(&self) -> Result<Vec<Project>> {
    let endpoint = with_query("/api/v3/projects", &[("pageSize", PAGE_SIZE.to_string())]);
    let elements: Vec<ApiProject> = self.get_collection(&endpoint).await?;
    Ok(elements.into_iter().map(Project::from).collect())
  }

  async fn get_collection<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>> {
    let body = self.make_api_call(endpoint, HttpMethod::Get, None).await?;
    let collection: ApiCollection<T> = serde_json::from_value(body)
      .map_err(|e| eyre!("Failed to parse response from {}: {}", endpoint, e))?;
    Ok(collection.embedded.elements)
  }
}

/// Append an endpoint (path plus optional query) to the server URL, keeping
/// any path prefix the server is mounted under.
fn join_endpoint(base: &Url, endpoint: &str) -> Result<Url> {
  let joined = format!("{}{}", base.as_str().trim_end_matches('/'), endpoint);
  Url::parse(&joined).map_err(|e| eyre!("Invalid endpoint {}: {}", endpoint, e))
}

fn with_query(path: &str, pairs: &[(&str, String)]) -> String {
  let query = url::form_urlencoded::Serializer::new(String::new())
    .extend_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())))
    .finish();
  format!("{}?{}", path, query)
}

fn parse_body(status: reqwest::StatusCode, text: &str) -> Result<Value> {
  if status == reqwest::StatusCode::NO_CONTENT || text.trim().is_empty() {
    return Ok(json!({}));
  }
  serde_json::from_str(text).map_err(|e| eyre!("Failed to parse API response: {}", e))
}

//! Messages exchanged between UI clients and the timer service.
//!
//! Requests are JSON objects tagged by their `action` field. Responses are
//! plain objects whose shape depends on the action.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::timer::{TimerHandle, TimerSnapshot};

/// HTTP method for the API proxy action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
  #[default]
  Get,
  Post,
  Patch,
  Delete,
}

impl HttpMethod {
  /// Whether requests with this method carry a body.
  pub fn has_body(self) -> bool {
    matches!(self, HttpMethod::Post | HttpMethod::Patch)
  }
}

impl From<HttpMethod> for reqwest::Method {
  fn from(method: HttpMethod) -> Self {
    match method {
      HttpMethod::Get => reqwest::Method::GET,
      HttpMethod::Post => reqwest::Method::POST,
      HttpMethod::Patch => reqwest::Method::PATCH,
      HttpMethod::Delete => reqwest::Method::DELETE,
    }
  }
}

/// A request from a UI client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
  StartTimer {
    #[serde(rename = "workPackageId", default, deserialize_with = "string_or_number")]
    work_package_id: String,
    #[serde(default, deserialize_with = "string_or_null")]
    comment: String,
  },
  PauseTimer,
  ResetTimer,
  GetTimerState,
  UpdateTimerData {
    #[serde(rename = "workPackageId", default, deserialize_with = "string_or_number")]
    work_package_id: String,
    #[serde(default, deserialize_with = "string_or_null")]
    comment: String,
  },
  /// Forward a call to the project-management REST API
  MakeApiCall {
    endpoint: String,
    #[serde(default)]
    method: HttpMethod,
    #[serde(default, alias = "body", skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
  },
}

/// A reply to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
  Started {
    success: bool,
    #[serde(rename = "isRunning")]
    is_running: bool,
  },
  Ack {
    success: bool,
  },
  State(TimerSnapshot),
  Error {
    error: String,
  },
  /// Parsed body returned by the REST API
  Api(Value),
}

impl Response {
  pub fn ack() -> Self {
    Response::Ack { success: true }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Response::Error {
      error: message.into(),
    }
  }
}

/// Serve the timer actions of the protocol.
///
/// Returns `None` for `makeApiCall`, which is not a timer action.
pub async fn dispatch_timer(timer: &TimerHandle, request: Request) -> Option<Response> {
  let result = match request {
    Request::StartTimer {
      work_package_id,
      comment,
    } => timer
      .start(work_package_id, comment)
      .await
      .map(|is_running| Response::Started {
        success: true,
        is_running,
      }),
    Request::PauseTimer => timer.pause().await.map(|_| Response::ack()),
    Request::ResetTimer => timer.reset().await.map(|_| Response::ack()),
    Request::GetTimerState => timer.query().await.map(Response::State),
    Request::UpdateTimerData {
      work_package_id,
      comment,
    } => timer
      .update_metadata(work_package_id, comment)
      .await
      .map(|_| Response::ack()),
    Request::MakeApiCall { .. } => return None,
  };

  Some(result.unwrap_or_else(|e| Response::error(e.to_string())))
}

/// Work package ids arrive as strings from form fields and as numbers from
/// API payloads; both are kept as strings.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  match Option::<Value>::deserialize(deserializer)? {
    None | Some(Value::Null) => Ok(String::new()),
    Some(Value::String(s)) => Ok(s),
    Some(Value::Number(n)) => Ok(n.to_string()),
    Some(other) => Err(serde::de::Error::custom(format!(
      "expected a string or number, got {}",
      other
    ))),
  }
}

fn string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::{from_millis, ManualClock};
  use crate::kv::MemoryKvStore;
  use serde_json::json;
  use std::sync::Arc;

  #[test]
  fn test_parse_start_timer() {
    let request: Request = serde_json::from_value(json!({
      "action": "startTimer",
      "workPackageId": 42,
      "comment": "writing tests"
    }))
    .unwrap();

    assert_eq!(
      request,
      Request::StartTimer {
        work_package_id: "42".into(),
        comment: "writing tests".into(),
      }
    );
  }

  #[test]
  fn test_parse_actions_without_fields() {
    for (action, expected) in [
      ("pauseTimer", Request::PauseTimer),
      ("resetTimer", Request::ResetTimer),
      ("getTimerState", Request::GetTimerState),
    ] {
      let request: Request = serde_json::from_value(json!({ "action": action })).unwrap();
      assert_eq!(request, expected);
    }
  }

  #[test]
  fn test_parse_api_call_defaults_and_alias() {
    let request: Request = serde_json::from_value(json!({
      "action": "makeApiCall",
      "endpoint": "/api/v3/projects"
    }))
    .unwrap();
    assert_eq!(
      request,
      Request::MakeApiCall {
        endpoint: "/api/v3/projects".into(),
        method: HttpMethod::Get,
        data: None,
      }
    );

    let request: Request = serde_json::from_value(json!({
      "action": "makeApiCall",
      "endpoint": "/api/v3/time_entries",
      "method": "POST",
      "body": { "hours": "PT1H" }
    }))
    .unwrap();
    assert!(matches!(
      request,
      Request::MakeApiCall { method: HttpMethod::Post, data: Some(_), .. }
    ));
  }

  #[test]
  fn test_unknown_action_is_rejected() {
    let result = serde_json::from_value::<Request>(json!({ "action": "launchRocket" }));
    assert!(result.is_err());
  }

  #[test]
  fn test_response_shapes() {
    assert_eq!(
      serde_json::to_value(Response::Started {
        success: true,
        is_running: true
      })
      .unwrap(),
      json!({ "success": true, "isRunning": true })
    );
    assert_eq!(
      serde_json::to_value(Response::ack()).unwrap(),
      json!({ "success": true })
    );
    assert_eq!(
      serde_json::to_value(Response::error("nope")).unwrap(),
      json!({ "error": "nope" })
    );
    assert_eq!(
      serde_json::to_value(Response::State(TimerSnapshot {
        seconds: 5,
        is_running: false,
        work_package_id: "42".into(),
        comment: "writing tests".into(),
      }))
      .unwrap(),
      json!({
        "seconds": 5,
        "isRunning": false,
        "workPackageId": "42",
        "comment": "writing tests"
      })
    );
  }

  #[tokio::test]
  async fn test_dispatch_timer_actions() {
    let clock = ManualClock::new(from_millis(0).unwrap());
    let timer = crate::timer::spawn(Arc::new(MemoryKvStore::default()), Arc::new(clock));

    let started = dispatch_timer(
      &timer,
      Request::StartTimer {
        work_package_id: "1".into(),
        comment: String::new(),
      },
    )
    .await;
    assert_eq!(
      started,
      Some(Response::Started {
        success: true,
        is_running: true
      })
    );

    let api = dispatch_timer(
      &timer,
      Request::MakeApiCall {
        endpoint: "/api/v3".into(),
        method: HttpMethod::Get,
        data: None,
      },
    )
    .await;
    assert!(api.is_none());
  }
}

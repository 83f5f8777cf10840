//! Mapping between [`TimerState`] and its persisted key layout.
//!
//! Elapsed time used to be stored in whole seconds under
//! `timerAccumulatedSeconds`. Loading accepts either shape; saving only ever
//! writes the millisecond key and drops the legacy one.

use color_eyre::Result;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::clock::{from_millis, to_millis};
use crate::kv::KeyValueStore;

use super::state::TimerState;

pub const KEY_START_TIME: &str = "timerStartTime";
pub const KEY_ACCUMULATED_MS: &str = "timerAccumulatedMS";
pub const KEY_ACCUMULATED_SECONDS: &str = "timerAccumulatedSeconds";
pub const KEY_IS_RUNNING: &str = "timerIsRunning";
pub const KEY_WORK_PACKAGE_ID: &str = "timerWorkPackageId";
pub const KEY_COMMENT: &str = "timerComment";

const ALL_KEYS: &[&str] = &[
  KEY_START_TIME,
  KEY_ACCUMULATED_MS,
  KEY_ACCUMULATED_SECONDS,
  KEY_IS_RUNNING,
  KEY_WORK_PACKAGE_ID,
  KEY_COMMENT,
];

/// Read the persisted timer, migrating the legacy layout if needed.
pub fn load(store: &dyn KeyValueStore) -> Result<TimerState> {
  let entries = store.get_many(ALL_KEYS)?;
  Ok(from_entries(&entries))
}

/// Write the canonical layout.
pub fn save(store: &dyn KeyValueStore, state: &TimerState) -> Result<()> {
  let start = state.start.map(to_millis);
  store.set_many(&[
    (KEY_START_TIME, json!(start)),
    (KEY_ACCUMULATED_MS, json!(state.accumulated_ms)),
    (KEY_IS_RUNNING, json!(state.is_running())),
    (KEY_WORK_PACKAGE_ID, json!(state.work_package_id)),
    (KEY_COMMENT, json!(state.comment)),
  ])?;
  store.remove(&[KEY_ACCUMULATED_SECONDS])
}

fn from_entries(entries: &HashMap<String, Value>) -> TimerState {
  let accumulated_ms = match (
    entries.get(KEY_ACCUMULATED_MS).and_then(as_millis),
    entries.get(KEY_ACCUMULATED_SECONDS).and_then(Value::as_f64),
  ) {
    (Some(ms), _) => ms,
    (None, Some(seconds)) => {
      debug!(seconds, "Migrating legacy accumulated seconds");
      (seconds.max(0.0) * 1000.0).round() as u64
    }
    (None, None) => 0,
  };

  let is_running = entries
    .get(KEY_IS_RUNNING)
    .and_then(Value::as_bool)
    .unwrap_or(false);

  let start = entries
    .get(KEY_START_TIME)
    .and_then(Value::as_i64)
    .and_then(from_millis);

  let start = match (is_running, start) {
    (true, Some(start)) => Some(start),
    (true, None) => {
      warn!("Persisted timer was running without a start time; treating it as paused");
      None
    }
    (false, _) => None,
  };

  TimerState {
    start,
    accumulated_ms,
    work_package_id: string_field(entries, KEY_WORK_PACKAGE_ID),
    comment: string_field(entries, KEY_COMMENT),
  }
}

/// Non-negative whole number, tolerating values stored as floats.
fn as_millis(value: &Value) -> Option<u64> {
  value
    .as_u64()
    .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
}

fn string_field(entries: &HashMap<String, Value>, key: &str) -> String {
  match entries.get(key) {
    Some(Value::String(s)) => s.clone(),
    Some(Value::Number(n)) => n.to_string(),
    _ => String::new(),
  }
}

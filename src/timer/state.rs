//! The work timer state and its transitions.
//!
//! Transitions are pure functions of the current state and the instant they
//! happen at, so they can be exercised without a running service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The single authoritative timer state.
///
/// `start` is `Some` exactly when the timer is running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimerState {
  /// When the current running interval began
  pub start: Option<DateTime<Utc>>,
  /// Milliseconds from completed intervals, excluding the running one
  pub accumulated_ms: u64,
  /// Work package the time is attributed to (empty when none)
  pub work_package_id: String,
  /// Free-text note carried with the timer
  pub comment: String,
}

/// Point-in-time view of the timer as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
  pub seconds: u64,
  pub is_running: bool,
  pub work_package_id: String,
  pub comment: String,
}

impl TimerState {
  pub fn is_running(&self) -> bool {
    self.start.is_some()
  }

  /// Total elapsed milliseconds at `now`, including any running interval.
  ///
  /// A start instant in the future (clock moved backwards) counts as zero.
  pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
    let running = self
      .start
      .map(|start| (now - start).num_milliseconds().max(0) as u64)
      .unwrap_or(0);
    self.accumulated_ms.saturating_add(running)
  }

  /// Begin a running interval. Returns `false` if already running, in which
  /// case nothing changes, including the attribution.
  pub fn start(&mut self, now: DateTime<Utc>, work_package_id: String, comment: String) -> bool {
    if self.is_running() {
      return false;
    }
    self.start = Some(now);
    self.work_package_id = work_package_id;
    self.comment = comment;
    true
  }

  /// Fold the running interval into the accumulated total. Returns `false`
  /// if the timer was not running.
  pub fn pause(&mut self, now: DateTime<Utc>) -> bool {
    if !self.is_running() {
      return false;
    }
    self.accumulated_ms = self.elapsed_ms(now);
    self.start = None;
    true
  }

  /// Return every field to its default.
  pub fn reset(&mut self) {
    *self = Self::default();
  }

  /// Re-attribute the timer without touching the timing fields.
  pub fn update_metadata(&mut self, work_package_id: String, comment: String) {
    self.work_package_id = work_package_id;
    self.comment = comment;
  }

  pub fn snapshot(&self, now: DateTime<Utc>) -> TimerSnapshot {
    TimerSnapshot {
      seconds: self.elapsed_ms(now) / 1000,
      is_running: self.is_running(),
      work_package_id: self.work_package_id.clone(),
      comment: self.comment.clone(),
    }
  }
}

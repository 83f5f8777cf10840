//! Daily "no work logged" reminder.
//!
//! Runs inside `serve`. After a short startup delay and then once per period
//! the service asks the server for today's time entries and warns when there
//! are none.

use chrono::{Local, NaiveDate};
use color_eyre::Result;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::openproject::{OpenProjectClient, TimeEntry};

pub const MISSING_WORK_MESSAGE: &str =
  "You haven't logged any work today. Don't forget to update your worklogs!";

/// Start the reminder loop if reminders are enabled and the server is
/// configured.
pub fn spawn(config: &Config, client: OpenProjectClient) -> Option<JoinHandle<()>> {
  let reminders = &config.reminders;
  if !reminders.enabled {
    debug!("Work reminders disabled");
    return None;
  }
  if config.server.url.is_none() || config.api_key().is_none() {
    debug!("Work reminders need a server URL and API key; not starting");
    return None;
  }

  let first_delay = Duration::from_secs(reminders.first_delay_secs);
  let period = Duration::from_secs(reminders.period_secs.max(1));
  info!(?first_delay, ?period, "Work reminders enabled");

  Some(tokio::spawn(run(first_delay, period, move || {
    let client = client.clone();
    async move {
      let today = Local::now().date_naive();
      let entries = client.list_time_entries_on(today).await?;
      Ok(missing_work(today, &entries))
    }
  })))
}

/// Invoke `check` after `first_delay` and then every `period`, warning each
/// time it reports missing work. Failed checks are logged and skipped.
async fn run<F, Fut>(first_delay: Duration, period: Duration, mut check: F)
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<bool>>,
{
  tokio::time::sleep(first_delay).await;
  let mut interval = tokio::time::interval(period);

  loop {
    interval.tick().await;
    match check().await {
      Ok(true) => warn!("{}", MISSING_WORK_MESSAGE),
      Ok(false) => debug!("Work already logged today"),
      Err(e) => warn!("Could not check today's time entries: {}", e),
    }
  }
}

/// True when none of `entries` was spent on `day`.
pub fn missing_work(day: NaiveDate, entries: &[TimeEntry]) -> bool {
  let day = day.format("%Y-%m-%d").to_string();
  !entries.iter().any(|e| e.spent_on == day)
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  fn entry(spent_on: &str) -> TimeEntry {
    TimeEntry {
      id: 1,
      spent_on: spent_on.into(),
      hours: 1.0,
      work_package_id: Some(42),
      work_package_title: None,
      comment: String::new(),
    }
  }

  #[test]
  fn test_missing_work() {
    let day = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
    assert!(missing_work(day, &[]));
    assert!(missing_work(day, &[entry("2024-03-04")]));
    assert!(!missing_work(day, &[entry("2024-03-04"), entry("2024-03-05")]));
  }

  fn reminders_on() -> Config {
    let mut config = Config::default();
    config.reminders.enabled = true;
    config
  }

  #[test]
  fn test_disabled_reminders_do_not_spawn() {
    let config = Config::default();
    let client = OpenProjectClient::new(&config).unwrap();
    assert!(spawn(&config, client).is_none());
  }

  #[test]
  fn test_reminders_without_server_do_not_spawn() {
    let config = reminders_on();
    let client = OpenProjectClient::new(&config).unwrap();
    assert!(spawn(&config, client).is_none());
  }

  #[tokio::test]
  async fn test_reminders_with_server_spawn() {
    let mut config = reminders_on();
    config.server.url = Some("https://op.example.com".into());
    config.server.api_key = Some("secret".into());
    config.reminders.first_delay_secs = 3600;

    let client = OpenProjectClient::new(&config).unwrap();
    let task = spawn(&config, client).expect("reminder task");
    task.abort();
  }

  #[test]
  fn test_reminder_wording() {
    assert_eq!(
      MISSING_WORK_MESSAGE,
      "You haven't logged any work today. Don't forget to update your worklogs!"
    );
  }

  #[tokio::test]
  async fn test_checks_repeat_and_survive_errors() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let task = tokio::spawn(run(
      Duration::from_millis(1),
      Duration::from_millis(5),
      move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
          if n == 0 {
            Err::<bool, _>(eyre!("server unreachable"))
          } else {
            Ok(true)
          }
        }
      },
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    task.abort();
    assert!(calls.load(Ordering::SeqCst) >= 3);
  }
}

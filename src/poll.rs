//! Periodic refresh of the displayed timer.
//!
//! A [`TimerPoller`] asks for the timer state on a fixed interval and hands
//! each snapshot to its owner. Polling stops by itself once the timer is idle
//! at zero or the service stops answering, and is cancelled when the poller
//! is dropped, so no interval outlives the view that started it.

use color_eyre::Result;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::timer::TimerSnapshot;

/// Events produced by the poller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollEvent {
  /// Fresh timer state
  Tick(TimerSnapshot),
  /// Timer is paused at zero; polling has stopped
  Idle,
  /// The state could not be fetched; polling has stopped
  Error(String),
}

pub struct TimerPoller {
  rx: mpsc::UnboundedReceiver<PollEvent>,
  task: JoinHandle<()>,
}

impl TimerPoller {
  /// Start polling with `fetch` every `period`. The first fetch is immediate.
  pub fn start<F, Fut>(period: Duration, mut fetch: F) -> Self
  where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<TimerSnapshot>> + Send + 'static,
  {
    let (tx, rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
      let mut interval = tokio::time::interval(period);
      interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
        interval.tick().await;

        let event = match fetch().await {
          Ok(snapshot) if !snapshot.is_running && snapshot.seconds == 0 => PollEvent::Idle,
          Ok(snapshot) => PollEvent::Tick(snapshot),
          Err(e) => PollEvent::Error(e.to_string()),
        };
        let done = !matches!(event, PollEvent::Tick(_));

        if tx.send(event).is_err() || done {
          break;
        }
      }
    });

    Self { rx, task }
  }

  /// Receive the next event. `None` once polling has ended.
  pub async fn next(&mut self) -> Option<PollEvent> {
    self.rx.recv().await
  }

  /// Stop polling.
  pub fn cancel(&self) {
    self.task.abort();
  }
}

impl Drop for TimerPoller {
  fn drop(&mut self) {
    self.task.abort();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::{from_millis, ManualClock};
  use crate::kv::MemoryKvStore;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  const FAST: Duration = Duration::from_millis(5);

  async fn drain(poller: &mut TimerPoller) -> Vec<PollEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), async {
      while let Some(event) = poller.next().await {
        events.push(event);
      }
    })
    .await
    .expect("poller did not stop");
    events
  }

  #[tokio::test]
  async fn test_stops_when_timer_is_idle() {
    let clock = ManualClock::new(from_millis(0).unwrap());
    let timer = crate::timer::spawn(Arc::new(MemoryKvStore::default()), Arc::new(clock.clone()));
    timer.start("42".into(), String::new()).await.unwrap();
    clock.advance(chrono::Duration::seconds(3));

    let handle = timer.clone();
    let mut poller = TimerPoller::start(FAST, move || {
      let handle = handle.clone();
      async move { handle.query().await }
    });

    match poller.next().await {
      Some(PollEvent::Tick(snapshot)) => assert_eq!(snapshot.seconds, 3),
      other => panic!("unexpected {:?}", other),
    }

    timer.reset().await.unwrap();
    let events = drain(&mut poller).await;
    assert_eq!(events.last(), Some(&PollEvent::Idle));
  }

  #[tokio::test]
  async fn test_stops_on_error() {
    let mut poller = TimerPoller::start(FAST, || async { Err::<TimerSnapshot, _>(eyre!("service gone")) });
    assert_eq!(
      drain(&mut poller).await,
      vec![PollEvent::Error("service gone".into())]
    );
  }

  #[tokio::test]
  async fn test_cancel_stops_fetching() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut poller = TimerPoller::start(FAST, move || {
      counter.fetch_add(1, Ordering::SeqCst);
      async {
        Ok::<_, color_eyre::Report>(TimerSnapshot {
          seconds: 1,
          is_running: true,
          work_package_id: String::new(),
          comment: String::new(),
        })
      }
    });

    assert!(matches!(poller.next().await, Some(PollEvent::Tick(_))));
    poller.cancel();
    drain(&mut poller).await;

    let after_cancel = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_cancel);
  }
}

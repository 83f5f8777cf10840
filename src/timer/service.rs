use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::kv::KeyValueStore;

use super::handle::{Envelope, TimerCommand, TimerHandle, TimerReply};
use super::persist;
use super::state::TimerState;

/// Start the timer service and return a handle to it.
///
/// The persisted state is loaded on a blocking thread. Commands sent in the
/// meantime stay queued in the channel and are replayed in arrival order once
/// loading is done. The service stops when the last handle is dropped.
pub fn spawn(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> TimerHandle {
  let (tx, rx) = mpsc::unbounded_channel();
  let (loaded_tx, loaded_rx) = watch::channel(false);

  tokio::spawn(run(store, clock, rx, loaded_tx));

  TimerHandle::new(tx, loaded_rx)
}

async fn run(
  store: Arc<dyn KeyValueStore>,
  clock: Arc<dyn Clock>,
  mut rx: mpsc::UnboundedReceiver<Envelope>,
  loaded: watch::Sender<bool>,
) {
  let state = load_state(Arc::clone(&store)).await;
  info!(
    running = state.is_running(),
    accumulated_ms = state.accumulated_ms,
    "Timer state loaded"
  );

  let queued = rx.len();
  if queued > 0 {
    debug!(queued, "Replaying commands received during load");
  }
  let _ = loaded.send(true);

  let (persist_tx, persist_rx) = mpsc::unbounded_channel();
  let persister = tokio::spawn(run_persister(store, persist_rx));

  let mut service = TimerService {
    state,
    clock,
    persist_tx,
  };

  let mut shutdown_reply = None;
  while let Some(Envelope { command, reply }) = rx.recv().await {
    if command == TimerCommand::Shutdown {
      shutdown_reply = Some(reply);
      break;
    }

    let response = service.handle(command);
    // The caller may have given up waiting
    let _ = reply.send(response);
  }

  // Closing the write queue lets the persister finish what is pending
  drop(service);
  if let Err(e) = persister.await {
    error!(error = %e, "Timer state writer failed");
  }

  if let Some(reply) = shutdown_reply {
    let _ = reply.send(TimerReply::Done);
  }
  debug!("Timer service stopped");
}

async fn load_state(store: Arc<dyn KeyValueStore>) -> TimerState {
  match tokio::task::spawn_blocking(move || persist::load(store.as_ref())).await {
    Ok(Ok(state)) => state,
    Ok(Err(e)) => {
      error!(error = %e, "Failed to load timer state, starting from defaults");
      TimerState::default()
    }
    Err(e) => {
      error!(error = %e, "Timer state loader panicked, starting from defaults");
      TimerState::default()
    }
  }
}

/// Writes state snapshots in order. When several are waiting only the newest
/// is written.
async fn run_persister(store: Arc<dyn KeyValueStore>, mut rx: mpsc::UnboundedReceiver<TimerState>) {
  while let Some(mut state) = rx.recv().await {
    while let Ok(newer) = rx.try_recv() {
      state = newer;
    }

    let store = Arc::clone(&store);
    let result = tokio::task::spawn_blocking(move || persist::save(store.as_ref(), &state)).await;
    match result {
      Ok(Ok(())) => debug!("Timer state persisted"),
      Ok(Err(e)) => error!(error = %e, "Failed to persist timer state"),
      Err(e) => error!(error = %e, "Timer state writer panicked"),
    }
  }
}

struct TimerService {
  state: TimerState,
  clock: Arc<dyn Clock>,
  persist_tx: mpsc::UnboundedSender<TimerState>,
}

impl TimerService {
  fn handle(&mut self, command: TimerCommand) -> TimerReply {
    let now = self.clock.now();

    match command {
      TimerCommand::Start {
        work_package_id,
        comment,
      } => {
        if self.state.start(now, work_package_id, comment) {
          info!(work_package_id = %self.state.work_package_id, "Timer started");
          self.persist();
        }
        TimerReply::Started {
          is_running: self.state.is_running(),
        }
      }
      TimerCommand::Pause => {
        if self.state.pause(now) {
          info!(accumulated_ms = self.state.accumulated_ms, "Timer paused");
          self.persist();
        }
        TimerReply::Done
      }
      TimerCommand::Reset => {
        self.state.reset();
        info!("Timer reset");
        self.persist();
        TimerReply::Done
      }
      TimerCommand::Query => TimerReply::State(self.state.snapshot(now)),
      // Handled by the run loop
      TimerCommand::Shutdown => TimerReply::Done,
      TimerCommand::UpdateMetadata {
        work_package_id,
        comment,
      } => {
        self.state.update_metadata(work_package_id, comment);
        debug!(work_package_id = %self.state.work_package_id, "Timer attribution updated");
        self.persist();
        TimerReply::Done
      }
    }
  }

  fn persist(&self) {
    if self.persist_tx.send(self.state.clone()).is_err() {
      error!("Timer state writer is gone; state will not be persisted");
    }
  }
}

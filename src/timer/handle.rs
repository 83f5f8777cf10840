use color_eyre::{eyre::eyre, Result};
use tokio::sync::{mpsc, oneshot, watch};

use super::state::TimerSnapshot;

/// A command for the timer service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerCommand {
  Start {
    work_package_id: String,
    comment: String,
  },
  Pause,
  Reset,
  Query,
  UpdateMetadata {
    work_package_id: String,
    comment: String,
  },
  /// Stop after every pending write has reached the store
  Shutdown,
}

/// The service's answer to a [`TimerCommand`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerReply {
  /// Reply to `Start`, with the running flag after the command
  Started { is_running: bool },
  /// Reply to `Pause`, `Reset`, `UpdateMetadata` and `Shutdown`
  Done,
  /// Reply to `Query`
  State(TimerSnapshot),
}

pub(super) struct Envelope {
  pub command: TimerCommand,
  pub reply: oneshot::Sender<TimerReply>,
}

/// Cloneable handle to the timer service.
#[derive(Clone)]
pub struct TimerHandle {
  tx: mpsc::UnboundedSender<Envelope>,
  loaded: watch::Receiver<bool>,
}

impl TimerHandle {
  pub(super) fn new(tx: mpsc::UnboundedSender<Envelope>, loaded: watch::Receiver<bool>) -> Self {
    Self { tx, loaded }
  }

  /// Whether the persisted state has been loaded.
  pub fn is_loaded(&self) -> bool {
    *self.loaded.borrow()
  }

  /// Wait until the persisted state has been loaded.
  #[cfg(test)]
  pub async fn wait_loaded(&self) -> Result<()> {
    let mut loaded = self.loaded.clone();
    loaded
      .wait_for(|loaded| *loaded)
      .await
      .map_err(|_| eyre!("Timer service stopped before loading its state"))?;
    Ok(())
  }

  /// Queue a command without waiting for it to be processed.
  ///
  /// Commands queued before the state has loaded are held and processed, in
  /// order, once loading finishes.
  pub fn enqueue(&self, command: TimerCommand) -> Result<oneshot::Receiver<TimerReply>> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Envelope { command, reply })
      .map_err(|_| eyre!("Timer service is not running"))?;
    Ok(rx)
  }

  /// Send a command and wait for the reply.
  pub async fn send(&self, command: TimerCommand) -> Result<TimerReply> {
    self
      .enqueue(command)?
      .await
      .map_err(|_| eyre!("Timer service dropped the request"))
  }

  /// Start the timer. Returns the running flag afterwards.
  pub async fn start(&self, work_package_id: String, comment: String) -> Result<bool> {
    match self
      .send(TimerCommand::Start {
        work_package_id,
        comment,
      })
      .await?
    {
      TimerReply::Started { is_running } => Ok(is_running),
      other => Err(unexpected(other)),
    }
  }

  pub async fn pause(&self) -> Result<()> {
    self.expect_done(TimerCommand::Pause).await
  }

  pub async fn reset(&self) -> Result<()> {
    self.expect_done(TimerCommand::Reset).await
  }

  pub async fn update_metadata(&self, work_package_id: String, comment: String) -> Result<()> {
    self
      .expect_done(TimerCommand::UpdateMetadata {
        work_package_id,
        comment,
      })
      .await
  }

  pub async fn query(&self) -> Result<TimerSnapshot> {
    match self.send(TimerCommand::Query).await? {
      TimerReply::State(snapshot) => Ok(snapshot),
      other => Err(unexpected(other)),
    }
  }

  /// Stop the service once the state has been written. Commands queued
  /// after this one are dropped.
  pub async fn shutdown(&self) -> Result<()> {
    self.expect_done(TimerCommand::Shutdown).await
  }

  async fn expect_done(&self, command: TimerCommand) -> Result<()> {
    match self.send(command).await? {
      TimerReply::Done => Ok(()),
      other => Err(unexpected(other)),
    }
  }
}

fn unexpected(reply: TimerReply) -> color_eyre::Report {
  eyre!("Unexpected reply from timer service: {:?}", reply)
}

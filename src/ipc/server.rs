use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::io::ErrorKind;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use crate::openproject::OpenProjectClient;
use crate::protocol::{self, Request, Response};
use crate::timer::TimerHandle;

/// What the server dispatches requests to.
#[derive(Clone)]
pub struct Services {
  pub timer: TimerHandle,
  pub api: OpenProjectClient,
}

impl Services {
  /// Answer one request.
  pub async fn handle(&self, request: Request) -> Response {
    if let Request::MakeApiCall {
      endpoint,
      method,
      data,
    } = request
    {
      return match self.api.make_api_call(&endpoint, method, data.as_ref()).await {
        Ok(body) => Response::Api(body),
        Err(e) => {
          warn!(%endpoint, error = %e, "API call failed");
          Response::error(e.to_string())
        }
      };
    }

    if !self.timer.is_loaded() {
      debug!("Timer request queued until state is loaded");
    }

    protocol::dispatch_timer(&self.timer, request)
      .await
      .unwrap_or_else(|| Response::error("Unsupported action"))
  }
}

/// IPC server
pub struct IpcServer {
  socket_path: PathBuf,
  listener: UnixListener,
  /// (device, inode) of the socket file this server created
  socket_id: (u64, u64),
}

impl IpcServer {
  /// Bind the socket, replacing a stale one left by an earlier run.
  ///
  /// Fails if another service is still listening on the path, so only one
  /// timer ever owns the persisted state.
  pub fn bind(socket_path: impl AsRef<Path>) -> Result<Self> {
    let socket_path = socket_path.as_ref().to_path_buf();

    if socket_path.exists() {
      match std::os::unix::net::UnixStream::connect(&socket_path) {
        Ok(_) => {
          return Err(eyre!(
            "Timer service already running at {}",
            socket_path.display()
          ));
        }
        Err(e) if e.kind() == ErrorKind::ConnectionRefused => {
          debug!(path = %socket_path.display(), "Removing stale socket");
          std::fs::remove_file(&socket_path).map_err(|e| {
            eyre!("Failed to remove stale socket {}: {}", socket_path.display(), e)
          })?;
        }
        Err(e) => {
          return Err(eyre!(
            "Cannot tell whether {} is in use: {}",
            socket_path.display(),
            e
          ));
        }
      }
    }

    if let Some(parent) = socket_path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create socket directory: {}", e))?;
    }

    let listener = UnixListener::bind(&socket_path)
      .map_err(|e| eyre!("Failed to bind {}: {}", socket_path.display(), e))?;

    // Only the owning user may talk to the service
    std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))
      .map_err(|e| eyre!("Failed to set socket permissions: {}", e))?;

    let socket_id = file_id(&socket_path)
      .map_err(|e| eyre!("Failed to stat socket {}: {}", socket_path.display(), e))?;

    info!(path = %socket_path.display(), "IPC server listening");

    Ok(Self {
      socket_path,
      listener,
      socket_id,
    })
  }

  /// Accept connections until `shutdown` completes.
  pub async fn run(self, services: Services, shutdown: impl Future<Output = ()>) -> Result<()> {
    tokio::pin!(shutdown);

    loop {
      tokio::select! {
        _ = &mut shutdown => break,
        accepted = self.listener.accept() => match accepted {
          Ok((stream, _)) => {
            debug!("Client connected");
            tokio::spawn(handle_client(stream, services.clone()));
          }
          Err(e) => {
            error!(error = %e, "Failed to accept connection");
          }
        },
      }
    }

    info!("IPC server shutting down");
    // The path may since have been taken over by a newer server
    match file_id(&self.socket_path) {
      Ok(id) if id == self.socket_id => {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
          warn!(error = %e, "Failed to remove socket");
        }
      }
      Ok(_) => debug!("Socket path now belongs to another server, leaving it"),
      Err(e) => debug!(error = %e, "Socket already gone"),
    }

    Ok(())
  }
}

fn file_id(path: &Path) -> std::io::Result<(u64, u64)> {
  let metadata = std::fs::metadata(path)?;
  Ok((metadata.dev(), metadata.ino()))
}

async fn handle_client(stream: UnixStream, services: Services) {
  let (read_half, mut write_half) = stream.into_split();
  let mut reader = BufReader::new(read_half);
  let mut line = String::new();

  loop {
    line.clear();
    match reader.read_line(&mut line).await {
      Ok(0) => {
        debug!("Client disconnected (EOF)");
        break;
      }
      Ok(_) => {
        let trimmed = line.trim();
        if trimmed.is_empty() {
          continue;
        }

        let response = match serde_json::from_str::<Request>(trimmed) {
          Ok(request) => services.handle(request).await,
          Err(e) => {
            warn!(error = %e, "Invalid request");
            Response::error(format!("Invalid request: {}", e))
          }
        };

        let mut json = match serde_json::to_string(&response) {
          Ok(json) => json,
          Err(e) => {
            error!(error = %e, "Failed to serialize response");
            break;
          }
        };
        json.push('\n');

        if let Err(e) = write_half.write_all(json.as_bytes()).await {
          debug!(error = %e, "Failed to write response, dropping client");
          break;
        }
      }
      Err(e) => {
        debug!(error = %e, "Failed to read from client");
        break;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::{from_millis, ManualClock};
  use crate::config::Config;
  use crate::ipc::IpcClient;
  use crate::kv::MemoryKvStore;
  use crate::protocol::HttpMethod;
  use chrono::Duration;
  use serde_json::json;
  use std::sync::Arc;

  fn services(clock: ManualClock) -> Services {
    Services {
      timer: crate::timer::spawn(Arc::new(MemoryKvStore::default()), Arc::new(clock)),
      api: OpenProjectClient::new(&Config::default()).unwrap(),
    }
  }

  fn run_until_stopped(
    server: IpcServer,
    clock: ManualClock,
  ) -> (
    tokio::sync::oneshot::Sender<()>,
    tokio::task::JoinHandle<Result<()>>,
  ) {
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
    let task = tokio::spawn(server.run(services(clock), async move {
      let _ = stop_rx.await;
    }));
    (stop_tx, task)
  }

  async fn serve(dir: &Path, clock: ManualClock) -> (PathBuf, tokio::sync::oneshot::Sender<()>) {
    let socket = dir.join("op.sock");
    let server = IpcServer::bind(&socket).unwrap();
    let (stop_tx, _task) = run_until_stopped(server, clock);
    (socket, stop_tx)
  }

  #[tokio::test]
  async fn test_second_server_is_refused_while_first_is_live() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(from_millis(0).unwrap());
    let (socket, _stop) = serve(dir.path(), clock.clone()).await;

    let err = IpcServer::bind(&socket).err().expect("second bind must fail");
    assert!(err.to_string().contains("already running"));

    // The first service is untouched
    let mut client = IpcClient::connect(&socket).await.unwrap();
    assert_eq!(client.query().await.unwrap().seconds, 0);
  }

  #[tokio::test]
  async fn test_stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("op.sock");
    drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
    assert!(socket.exists());

    let server = IpcServer::bind(&socket).unwrap();
    let (_stop, _task) = run_until_stopped(server, ManualClock::new(from_millis(0).unwrap()));

    let mut client = IpcClient::connect(&socket).await.unwrap();
    assert!(!client.query().await.unwrap().is_running);
  }

  #[tokio::test]
  async fn test_shutdown_leaves_a_newer_servers_socket() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("op.sock");
    let clock = ManualClock::new(from_millis(0).unwrap());

    let old = IpcServer::bind(&socket).unwrap();
    let (stop_old, old_task) = run_until_stopped(old, clock.clone());

    // Someone removed the old socket and a new service took the path
    std::fs::remove_file(&socket).unwrap();
    let new = IpcServer::bind(&socket).unwrap();
    let (_stop_new, _new_task) = run_until_stopped(new, clock);

    stop_old.send(()).unwrap();
    old_task.await.unwrap().unwrap();

    assert!(socket.exists());
    let mut client = IpcClient::connect(&socket).await.unwrap();
    assert_eq!(client.query().await.unwrap().seconds, 0);
  }

  #[tokio::test]
  async fn test_timer_roundtrip_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(from_millis(1_700_000_000_000).unwrap());
    let (socket, _stop) = serve(dir.path(), clock.clone()).await;

    let mut client = IpcClient::connect(&socket).await.unwrap();
    assert!(client.start("42", "writing tests").await.unwrap());
    clock.advance(Duration::milliseconds(5000));
    client.pause().await.unwrap();

    let snapshot = client.query().await.unwrap();
    assert_eq!(snapshot.seconds, 5);
    assert!(!snapshot.is_running);
    assert_eq!(snapshot.work_package_id, "42");
    assert_eq!(snapshot.comment, "writing tests");
  }

  #[tokio::test]
  async fn test_two_clients_share_one_timer() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new(from_millis(0).unwrap());
    let (socket, _stop) = serve(dir.path(), clock.clone()).await;

    let mut popup = IpcClient::connect(&socket).await.unwrap();
    let mut widget = IpcClient::connect(&socket).await.unwrap();

    popup.start("1", "").await.unwrap();
    clock.advance(Duration::seconds(2));
    widget.update("2", "moved").await.unwrap();

    let seen = popup.query().await.unwrap();
    assert!(seen.is_running);
    assert_eq!(seen.seconds, 2);
    assert_eq!(seen.work_package_id, "2");
  }

  #[tokio::test]
  async fn test_invalid_and_unconfigured_requests_get_error_field() {
    let dir = tempfile::tempdir().unwrap();
    let (socket, _stop) = serve(dir.path(), ManualClock::new(from_millis(0).unwrap())).await;
    let mut client = IpcClient::connect(&socket).await.unwrap();

    let reply = client.send_raw(&json!({ "action": "launchRocket" })).await.unwrap();
    assert!(reply["error"].as_str().unwrap().starts_with("Invalid request"));

    let err = client
      .api_call("/api/v3/projects", HttpMethod::Get, None)
      .await
      .unwrap_err();
    assert!(err.to_string().contains("must be configured"));
  }

  #[tokio::test]
  async fn test_socket_removed_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let (socket, stop) = serve(dir.path(), ManualClock::new(from_millis(0).unwrap())).await;
    assert!(socket.exists());

    stop.send(()).unwrap();
    for _ in 0..100 {
      if !socket.exists() {
        return;
      }
      tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("socket was not removed");
  }
}

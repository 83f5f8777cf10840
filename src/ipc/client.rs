use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;

use crate::protocol::{HttpMethod, Request};
use crate::timer::TimerSnapshot;

/// IPC client for talking to a running timer service.
pub struct IpcClient {
  reader: BufReader<OwnedReadHalf>,
  writer: OwnedWriteHalf,
}

impl IpcClient {
  pub async fn connect(socket_path: impl AsRef<Path>) -> Result<Self> {
    let socket_path = socket_path.as_ref();
    let stream = UnixStream::connect(socket_path).await.map_err(|e| {
      eyre!(
        "Timer service is not reachable at {} ({}). Start it with `opassist serve`.",
        socket_path.display(),
        e
      )
    })?;
    let (read_half, write_half) = stream.into_split();

    Ok(Self {
      reader: BufReader::new(read_half),
      writer: write_half,
    })
  }

  /// Send a message and wait for the reply.
  pub async fn send_raw<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<Value> {
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    self.writer.write_all(json.as_bytes()).await?;

    let mut line = String::new();
    let n = self.reader.read_line(&mut line).await?;
    if n == 0 {
      return Err(eyre!("Timer service closed the connection"));
    }

    Ok(serde_json::from_str(line.trim())?)
  }

  /// Send a request, turning an `error` reply into an `Err`.
  async fn call(&mut self, request: &Request) -> Result<Value> {
    let reply = self.send_raw(request).await?;
    match reply.get("error").and_then(Value::as_str) {
      Some(message) => Err(eyre!("{}", message)),
      None => Ok(reply),
    }
  }

  async fn call_ack(&mut self, request: &Request) -> Result<()> {
    let reply = self.call(request).await?;
    match reply.get("success").and_then(Value::as_bool) {
      Some(true) => Ok(()),
      _ => Err(eyre!("Unexpected reply: {}", reply)),
    }
  }

  pub async fn start(&mut self, work_package_id: &str, comment: &str) -> Result<bool> {
    let reply = self
      .call(&Request::StartTimer {
        work_package_id: work_package_id.to_string(),
        comment: comment.to_string(),
      })
      .await?;
    reply
      .get("isRunning")
      .and_then(Value::as_bool)
      .ok_or_else(|| eyre!("Unexpected reply: {}", reply))
  }

  pub async fn pause(&mut self) -> Result<()> {
    self.call_ack(&Request::PauseTimer).await
  }

  pub async fn reset(&mut self) -> Result<()> {
    self.call_ack(&Request::ResetTimer).await
  }

  pub async fn update(&mut self, work_package_id: &str, comment: &str) -> Result<()> {
    self
      .call_ack(&Request::UpdateTimerData {
        work_package_id: work_package_id.to_string(),
        comment: comment.to_string(),
      })
      .await
  }

  pub async fn query(&mut self) -> Result<TimerSnapshot> {
    let reply = self.call(&Request::GetTimerState).await?;
    serde_json::from_value(reply).map_err(|e| eyre!("Unexpected timer state: {}", e))
  }

  /// Proxy a REST call through the service.
  pub async fn api_call(
    &mut self,
    endpoint: &str,
    method: HttpMethod,
    data: Option<Value>,
  ) -> Result<Value> {
    self
      .call(&Request::MakeApiCall {
        endpoint: endpoint.to_string(),
        method,
        data,
      })
      .await
  }
}

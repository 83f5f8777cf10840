use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "opassist=info";

/// Log to stderr, honouring RUST_LOG (default `opassist=info`).
pub fn init_stderr() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(env_filter())
    .with_writer(std::io::stderr)
    .with_target(false)
    .try_init()
    .map_err(|e| eyre!("Failed to initialise logging: {}", e))
}

/// Log to stderr and to a daily rotated file under `<data_dir>/logs`.
pub fn init_with_file(data_dir: &Path) -> Result<()> {
  let appender = tracing_appender::rolling::Builder::new()
    .rotation(Rotation::DAILY)
    .max_log_files(7)
    .filename_prefix("opassist")
    .filename_suffix("log")
    .build(data_dir.join("logs"))
    .map_err(|e| eyre!("Failed to create log directory: {}", e))?;

  tracing_subscriber::fmt()
    .with_env_filter(env_filter())
    .with_writer(std::io::stderr.and(appender))
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to initialise logging: {}", e))
}

fn env_filter() -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

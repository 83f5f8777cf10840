mod cache;
mod clock;
mod config;
mod ipc;
mod kv;
mod logging;
mod openproject;
mod poll;
mod protocol;
mod reminder;
mod timer;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::cache::{
  CacheLayer, CacheResult, CacheSource, CacheStorage, CacheStore, NoopStorage, SqliteStorage,
};
use crate::clock::SystemClock;
use crate::config::Config;
use crate::ipc::{IpcClient, IpcServer, Services};
use crate::kv::{KeyValueStore, MemoryKvStore, SqliteKvStore};
use crate::openproject::duration::{format_clock, format_hours};
use crate::openproject::{new_time_entry, CachedOpenProjectClient, OpenProjectClient};
use crate::poll::{PollEvent, TimerPoller};
use crate::protocol::HttpMethod;
use crate::timer::TimerSnapshot;

#[derive(Parser, Debug)]
#[command(name = "opassist")]
#[command(about = "Time tracking companion for OpenProject")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/opassist/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// OpenProject server URL
  #[arg(long)]
  server_url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run the timer service
  Serve,
  /// Start the timer for a work package
  Start {
    #[arg(short, long)]
    work_package: String,
    #[arg(short = 'm', long, default_value = "")]
    comment: String,
  },
  /// Pause the timer
  Pause,
  /// Stop the timer and clear it
  Reset,
  /// Show the timer
  Status,
  /// Change the work package or comment without touching the time
  Update {
    #[arg(short, long)]
    work_package: String,
    #[arg(short = 'm', long, default_value = "")]
    comment: String,
  },
  /// Follow the timer until it is reset
  Watch,
  /// Log the timer as a time entry for today, then reset it
  Log {
    /// Hours to log instead of the timer value
    #[arg(long)]
    hours: Option<f64>,
  },
  /// Call an OpenProject API endpoint through the service
  Api {
    endpoint: String,
    #[arg(short = 'X', long, value_enum, default_value_t = HttpMethod::Get)]
    method: HttpMethod,
    /// JSON request body (POST and PATCH only)
    #[arg(short, long)]
    data: Option<String>,
  },
  /// List work packages
  WorkPackages {
    /// Ignore the cache
    #[arg(long)]
    refresh: bool,
  },
  /// List projects
  Projects {
    #[arg(long)]
    refresh: bool,
  },
  /// List time entries for a day (default: today)
  Worklogs {
    #[arg(long)]
    date: Option<NaiveDate>,
  },
  /// Inspect or clear the local cache
  Cache {
    #[command(subcommand)]
    command: CacheCommand,
  },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
  /// Record counts and ages per collection
  Stats,
  /// Drop every cached collection
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = Config::load(args.config.as_deref())?;

  // Override server if specified on command line
  let config = if let Some(url) = args.server_url {
    let mut config = config;
    config.server.url = Some(url);
    config
  } else {
    config
  };

  // Only the long-running service keeps a log file
  if matches!(args.command, Command::Serve) {
    logging::init_with_file(&config.data_dir()?)?;
  } else {
    logging::init_stderr()?;
  }

  run_command(config, args.command).await
}

async fn serve(config: Config) -> Result<()> {
  let data_dir = config.data_dir()?;

  let store: Arc<dyn KeyValueStore> = match SqliteKvStore::open(&data_dir.join("kv.db")) {
    Ok(store) => Arc::new(store),
    Err(e) => {
      error!("Failed to open timer storage, state will not survive a restart: {}", e);
      Arc::new(MemoryKvStore::default())
    }
  };

  let timer = timer::spawn(store, Arc::new(SystemClock));
  let api = OpenProjectClient::new(&config)?;
  let _reminders = reminder::spawn(&config, api.clone());

  let server = IpcServer::bind(config.socket_path()?)?;
  let shutdown = async {
    if let Err(e) = tokio::signal::ctrl_c().await {
      error!("Failed to listen for Ctrl-C: {}", e);
      std::future::pending::<()>().await;
    }
  };

  info!("Timer service started");
  let served = server
    .run(
      Services {
        timer: timer.clone(),
        api,
      },
      shutdown,
    )
    .await;

  // Acknowledged changes must reach the store before the process exits
  match timer.shutdown().await {
    Ok(()) => info!("Timer state saved"),
    Err(e) => error!("Failed to stop the timer service cleanly: {}", e),
  }

  served
}

async fn run_command(config: Config, command: Command) -> Result<()> {
  match command {
    Command::Serve => serve(config).await?,
    Command::Start {
      work_package,
      comment,
    } => {
      let mut client = connect(&config).await?;
      client.start(&work_package, &comment).await?;
      print_snapshot(&client.query().await?);
    }
    Command::Pause => {
      let mut client = connect(&config).await?;
      client.pause().await?;
      print_snapshot(&client.query().await?);
    }
    Command::Reset => {
      let mut client = connect(&config).await?;
      client.reset().await?;
      print_snapshot(&client.query().await?);
    }
    Command::Status => {
      let mut client = connect(&config).await?;
      print_snapshot(&client.query().await?);
    }
    Command::Update {
      work_package,
      comment,
    } => {
      let mut client = connect(&config).await?;
      client.update(&work_package, &comment).await?;
      print_snapshot(&client.query().await?);
    }
    Command::Watch => watch(&config).await?,
    Command::Log { hours } => {
      let mut client = connect(&config).await?;
      let snapshot = client.query().await?;
      if snapshot.work_package_id.is_empty() {
        return Err(eyre!("The timer has no work package"));
      }

      let hours = hours.unwrap_or(snapshot.seconds as f64 / 3600.0);
      if hours <= 0.0 {
        return Err(eyre!("Nothing to log"));
      }

      let body = new_time_entry(
        &snapshot.work_package_id,
        Local::now().date_naive(),
        hours,
        &snapshot.comment,
      );
      client
        .api_call("/api/v3/time_entries", HttpMethod::Post, Some(body))
        .await?;
      client.reset().await?;
      println!(
        "Logged {} on #{}",
        format_hours(hours),
        snapshot.work_package_id
      );
    }
    Command::Api {
      endpoint,
      method,
      data,
    } => {
      let data = data
        .map(|d| serde_json::from_str::<Value>(&d))
        .transpose()
        .map_err(|e| eyre!("Invalid JSON body: {}", e))?;
      let mut client = connect(&config).await?;
      let body = client.api_call(&endpoint, method, data).await?;
      println!("{}", serde_json::to_string_pretty(&body)?);
    }
    Command::WorkPackages { refresh } => {
      let result = cached_client(&config, refresh)?.work_packages().await?;
      print_source(&result);
      for wp in &result.data {
        println!(
          "#{:<7} {:<14} {}",
          wp.id,
          wp.status.as_deref().unwrap_or("-"),
          wp.subject
        );
      }
    }
    Command::Projects { refresh } => {
      let result = cached_client(&config, refresh)?.projects().await?;
      print_source(&result);
      for project in &result.data {
        println!("{:<20} {}", project.identifier.as_deref().unwrap_or("-"), project.name);
      }
    }
    Command::Worklogs { date } => {
      let day = date.unwrap_or_else(|| Local::now().date_naive());
      let result = cached_client(&config, false)?.time_entries_on(day).await?;
      print_source(&result);
      let mut total = 0.0;
      for entry in &result.data {
        total += entry.hours;
        println!(
          "{:>8}  #{:<7} {}",
          format_hours(entry.hours),
          entry
            .work_package_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".into()),
          entry
            .work_package_title
            .as_deref()
            .unwrap_or(entry.comment.as_str())
        );
      }
      println!("Total {}: {}", day, format_hours(total));
    }
    Command::Cache { command } => {
      let store = cache_store(&config);
      match command {
        CacheCommand::Stats => {
          println!("{}", serde_json::to_string_pretty(&store.stats().await)?);
        }
        CacheCommand::Clear => {
          if !store.clear_all().await {
            return Err(eyre!("Failed to clear cache"));
          }
          println!("Cache cleared");
        }
      }
    }
  }

  Ok(())
}

async fn connect(config: &Config) -> Result<IpcClient> {
  IpcClient::connect(config.socket_path()?).await
}

/// Print the timer once a second until it is reset or the service goes away.
async fn watch(config: &Config) -> Result<()> {
  let client = Arc::new(Mutex::new(connect(config).await?));
  let mut poller = TimerPoller::start(Duration::from_secs(1), move || {
    let client = client.clone();
    async move { client.lock().await.query().await }
  });

  loop {
    tokio::select! {
      event = poller.next() => match event {
        Some(PollEvent::Tick(snapshot)) => print_snapshot(&snapshot),
        Some(PollEvent::Idle) => {
          println!("Timer idle");
          break;
        }
        Some(PollEvent::Error(e)) => return Err(eyre!("Lost the timer service: {}", e)),
        None => break,
      },
      _ = tokio::signal::ctrl_c() => {
        poller.cancel();
        break;
      }
    }
  }

  Ok(())
}

fn print_snapshot(snapshot: &TimerSnapshot) {
  let state = if snapshot.is_running {
    "running"
  } else {
    "paused"
  };
  let work_package = if snapshot.work_package_id.is_empty() {
    "-".to_string()
  } else {
    format!("#{}", snapshot.work_package_id)
  };

  if snapshot.comment.is_empty() {
    println!("{} {} {}", format_clock(snapshot.seconds), state, work_package);
  } else {
    println!(
      "{} {} {} {}",
      format_clock(snapshot.seconds),
      state,
      work_package,
      snapshot.comment
    );
  }
}

fn print_source<T>(result: &CacheResult<T>) {
  match result.source {
    CacheSource::Network => {}
    CacheSource::CacheFresh => eprintln!("(cached)"),
    CacheSource::Offline => match result.cached_at {
      Some(at) => eprintln!(
        "(offline, showing data cached at {})",
        at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
      ),
      None => eprintln!("(offline, showing cached data)"),
    },
  }
}

fn cache_store(config: &Config) -> CacheStore {
  let storage: Arc<dyn CacheStorage> = match config.data_dir().and_then(|d| SqliteStorage::open(&d)) {
    Ok(storage) => Arc::new(storage),
    Err(e) => {
      warn!("Cache unavailable, continuing without it: {}", e);
      Arc::new(NoopStorage)
    }
  };
  CacheStore::new(storage, Arc::new(SystemClock))
}

fn cached_client(config: &Config, refresh: bool) -> Result<CachedOpenProjectClient> {
  let max_age = if refresh {
    chrono::Duration::zero()
  } else {
    config.cache_max_age()
  };
  let layer = CacheLayer::new(cache_store(config)).with_max_age(max_age);
  Ok(CachedOpenProjectClient::new(
    OpenProjectClient::new(config)?,
    layer,
  ))
}

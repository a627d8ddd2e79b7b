//! `numbly`: offline-first client for the Numbly sync server.
//!
//! Every change is written to a local SQLite database first and queued for
//! delivery; `push`, `pull`, `sync` and `watch` move it to and from the
//! server.
//!
//! # Usage
//!
//! ```text
//! numbly doc add "Tenancy agreement"
//! numbly --url http://localhost:8787 sync
//! numbly --config ~/.config/numbly/config.toml watch --interval-secs 10
//! ```

mod client;
mod commands;
mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client::HttpRemote;
use commands::{App, Command};
use config::{ConfigFile, Settings};
use numbly_store_sqlite::SqliteLocalStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "numbly", about = "Offline-first client for Numbly sync")]
struct Args {
  /// Path to a TOML config file (url, db_path).
  #[arg(short, long, value_name = "FILE", env = "NUMBLY_CONFIG")]
  config: Option<PathBuf>,

  /// Base URL of the sync server (default: http://localhost:8787).
  #[arg(long, env = "NUMBLY_URL")]
  url: Option<String>,

  /// Path of the local database (default: numbly.db).
  #[arg(long, env = "NUMBLY_DB")]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  let file_cfg = match &args.config {
    Some(path) => ConfigFile::read(path)?,
    None => ConfigFile::default(),
  };
  let settings = Settings::resolve(args.url, args.db, file_cfg);

  let local = SqliteLocalStore::open(&settings.db_path)
    .await
    .with_context(|| format!("opening local database {}", settings.db_path.display()))?;
  let remote = HttpRemote::new(settings.url.clone()).context("building HTTP client")?;

  let app = App::new(Arc::new(local), Arc::new(remote));
  let mut stdout = std::io::stdout();
  app.run(args.command, &mut stdout).await
}

//! Beebo memory bridge binary.
//!
//! Usage:
//!   beebo-api --config beebo.toml
//!   beebo-api --port 3000
//!   beebo-api --port 3000 --bind 0.0.0.0 --db ./data/beebo.db
//!
//! # Environment Variables
//!
//! - `BEEBO_TOKEN` (or `MCP_BRIDGE_TOKEN`) - Shared API token
//! - `BEEBO_DB_PATH` - SQLite database path
//! - `BEEBO_BIND_ADDR` - Bind address (default: 127.0.0.1)
//! - `PORT` - Listen port (default: 3000)
//! - `BEEBO_TIMEZONE` - IANA zone for "today" (default: UTC)
//! - `BEEBO_CORS_ORIGINS` - Allowed CORS origins (comma-separated)
//! - `OPENAI_API_KEY` - Enables embeddings and stream digests

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use beebo_api::{serve, AppState, RouterOptions, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
Beebo memory bridge

Usage: beebo-api [OPTIONS]

Options:
  -p, --port <PORT>      Port to listen on (default: 3000, env: PORT)
  -b, --bind <ADDR>      Bind address (default: 127.0.0.1, env: BEEBO_BIND_ADDR)
  -c, --config <FILE>    Path to a TOML config file
  -d, --db <FILE>        SQLite database path (env: BEEBO_DB_PATH)
  -h, --help             Show this help message

Environment variables:
  BEEBO_TOKEN            Shared API token (MCP_BRIDGE_TOKEN also accepted)
  BEEBO_TIMEZONE         IANA time zone for /memories/today
  BEEBO_CORS_ORIGINS     CORS allowed origins (comma-separated)
  OPENAI_API_KEY         Enables embeddings and stream digests
";

#[derive(Default)]
struct CliArgs {
    port: Option<u16>,
    bind: Option<String>,
    config: Option<PathBuf>,
    db: Option<PathBuf>,
    help: bool,
}

fn parse_args(args: &[String]) -> anyhow::Result<CliArgs> {
    let mut cli = CliArgs::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        let mut value = || {
            iter.next()
                .cloned()
                .with_context(|| format!("{arg} requires a value"))
        };
        match arg.as_str() {
            "--port" | "-p" => {
                let raw = value()?;
                cli.port = Some(raw.parse().with_context(|| format!("Invalid port: {raw}"))?);
            }
            "--bind" | "-b" => cli.bind = Some(value()?),
            "--config" | "-c" => cli.config = Some(PathBuf::from(value()?)),
            "--db" | "-d" => cli.db = Some(PathBuf::from(value()?)),
            "--help" | "-h" => cli.help = true,
            other => anyhow::bail!("Unknown argument: {other} (see --help)"),
        }
    }

    Ok(cli)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,beebo_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let cli = parse_args(&args)?;
    if cli.help {
        print!("{HELP}");
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!(path = %path.display(), "Loading configuration");
            ServerConfig::from_file(path)
                .with_context(|| format!("Failed to load config '{}'", path.display()))?
        }
        None => {
            tracing::info!("Using default configuration");
            ServerConfig::default()
        }
    };
    config.apply_env();

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }
    if let Some(db) = cli.db {
        config.memory.db_path = db;
    }

    if config.server.bind == "0.0.0.0" {
        tracing::warn!(
            "Server binding to 0.0.0.0, exposing the API on all network interfaces. \
             Make sure BEEBO_TOKEN is set."
        );
    }

    tracing::info!(
        db_path = %config.memory.db_path.display(),
        dedup_policy = ?config.memory.dedup_policy,
        semantic_threshold = config.memory.semantic_threshold,
        timezone = %config.memory.timezone,
        "Initializing memory store"
    );
    let state = AppState::from_config(&config)?;

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", config.server.bind))?;
    serve(Arc::new(state), addr, RouterOptions::from(&config)).await
}

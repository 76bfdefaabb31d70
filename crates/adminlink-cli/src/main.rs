//! adminlink - operator CLI for the admin console data-access layer.
//!
//! Drives the core against a live backend: stores tokens, shows the identity
//! headers that would be sent, issues requests and inspects the response cache.

mod commands;

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use adminlink_core::Config;

/// Log files are written here (daily rotation) when set
const LOG_DIR_ENV: &str = "ADMINLINK_LOG_DIR";
const BASE_URL_ENV: &str = "ADMINLINK_BASE_URL";
const STORAGE_DIR_ENV: &str = "ADMINLINK_STORAGE_DIR";

#[derive(Parser, Debug)]
#[command(name = "adminlink")]
#[command(version, about = "Talk to the admin backend through the adminlink core")]
struct Cli {
    /// Path to config file (default: $XDG_CONFIG_HOME/adminlink/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend origin, overrides the config file
    #[arg(long)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Store auth tokens and the session identity
    Login {
        #[arg(long)]
        access_token: String,

        #[arg(long)]
        refresh_token: Option<String>,

        /// Token expiry as RFC 3339
        #[arg(long)]
        expires_at: Option<String>,

        #[arg(long)]
        user_id: Option<String>,

        /// Repeat for several roles
        #[arg(long = "role")]
        roles: Vec<String>,

        #[arg(long)]
        user_type: Option<String>,
    },

    /// Clear stored tokens and session
    Logout,

    /// Show token status and the identity headers requests would carry
    Whoami,

    /// GET a path through the response cache
    Get {
        path: String,

        /// Query parameter as name=value (repeatable)
        #[arg(short = 'q', long = "query")]
        query: Vec<String>,

        /// Cache lifetime for this response in milliseconds
        #[arg(long, conflicts_with = "no_cache")]
        ttl_ms: Option<u64>,

        /// Fetch live even when a cached copy exists
        #[arg(long)]
        no_cache: bool,
    },

    /// Send a request without caching
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE)
        method: String,

        path: String,

        /// JSON request body
        #[arg(long)]
        body: Option<String>,

        /// Query parameter as name=value (repeatable)
        #[arg(short = 'q', long = "query")]
        query: Vec<String>,
    },

    /// Inspect the response cache
    #[command(subcommand)]
    Cache(CacheCommands),
}

#[derive(Subcommand, Debug)]
enum CacheCommands {
    /// Print a cached entry and its age
    Show { key: String },

    /// Remove a cached entry
    #[command(alias = "rm")]
    Remove { key: String },
}

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing() -> Option<WorkerGuard> {
    // RUST_LOG controls the level (e.g. RUST_LOG=adminlink_core=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var_os(LOG_DIR_ENV) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "adminlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match cli.config {
        Some(ref path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load config")?;

    if let Ok(url) = std::env::var(BASE_URL_ENV) {
        config.base_url = url;
    }
    if let Some(dir) = std::env::var_os(STORAGE_DIR_ENV) {
        config.storage_dir = Some(PathBuf::from(dir));
    }
    if let Some(ref url) = cli.base_url {
        config.base_url = url.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    info!(base_url = %config.base_url, "adminlink starting");

    let ctx = commands::Context::new(config)?;

    match cli.command {
        Commands::Login {
            access_token,
            refresh_token,
            expires_at,
            user_id,
            roles,
            user_type,
        } => commands::login(
            &ctx,
            commands::LoginArgs {
                access_token,
                refresh_token,
                expires_at,
                user_id,
                roles,
                user_type,
            },
        ),
        Commands::Logout => commands::logout(&ctx),
        Commands::Whoami => commands::whoami(&ctx),
        Commands::Get {
            path,
            query,
            ttl_ms,
            no_cache,
        } => commands::get(&ctx, &path, &query, ttl_ms, no_cache).await,
        Commands::Request {
            method,
            path,
            body,
            query,
        } => commands::request(&ctx, &method, &path, body.as_deref(), &query).await,
        Commands::Cache(CacheCommands::Show { key }) => commands::cache_show(&ctx, &key),
        Commands::Cache(CacheCommands::Remove { key }) => commands::cache_remove(&ctx, &key),
    }
}

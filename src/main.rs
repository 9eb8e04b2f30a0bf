//! Command line interface for operating the vibe-sharing backend. Supports
//! initializing the store, serving the HTTP API, rebuilding indexes, and
//! issuing user tokens.

mod access;
mod auth;
mod blanks;
mod config;
mod error;
mod model;
mod routes;
mod server;
mod storage;
mod upload;

use std::{
    fs,
    net::SocketAddr,
    path::Path,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::Settings;
use server::AppState;
use storage::Store;
use tracing::info;
use upload::{UploadConfig, DEFAULT_MAX_BYTES};

/// Command line interface entry point.
#[derive(Parser)]
#[command(
    name = "vibeshare",
    author,
    version,
    about = "File-backed backend for sharing vibes"
)]
struct Cli {
    /// Path to the `.env` configuration file.
    #[arg(long, default_value = ".env")]
    env: String,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the directory tree at `STORE_ROOT` and the upload directory.
    Init,
    /// Launch the HTTP API.
    Serve,
    /// Rebuild owner, token, and email indexes from stored documents.
    Reindex,
    /// Manage users.
    User {
        #[command(subcommand)]
        action: UserAction,
    },
}

/// Operations available under `vibeshare user`.
#[derive(Subcommand)]
enum UserAction {
    /// Create a user and print its bearer token. The token is shown only once.
    Add { email: String },
}

/// Execute the selected CLI subcommand.
async fn run(cli: Cli) -> anyhow::Result<()> {
    ensure_env_file(&cli.env)?;
    let cfg = Settings::from_env(&cli.env)?;
    let store = Store::new(cfg.store_root.clone());
    let uploads = UploadConfig::new(cfg.upload_dir.clone(), cfg.upload_max_bytes);
    match cli.command {
        Commands::Init => {
            // Create the on-disk directory structure.
            store.init()?;
            uploads.init()?;
            info!("initialized store at {}", cfg.store_root.display());
        }
        Commands::Serve => {
            store.init()?;
            uploads.init()?;
            let http_addr: SocketAddr = cfg
                .bind_http
                .parse()
                .with_context(|| format!("invalid BIND_HTTP: {}", cfg.bind_http))?;
            let app = server::app(AppState { store, uploads }, &cfg.cors_origins);
            server::serve_http(http_addr, app, server::shutdown_signal()).await?;
        }
        Commands::Reindex => {
            store.reindex()?;
        }
        Commands::User {
            action: UserAction::Add { email },
        } => {
            store.init()?;
            let (user, token) = store.create_user(&email)?;
            println!("id: {}", user.id);
            println!("token: {token}");
        }
    }
    Ok(())
}

/// Create a default `.env` file if one is not already present at `path`.
fn ensure_env_file(path: &str) -> anyhow::Result<()> {
    let env_path = Path::new(path);
    if env_path.exists() {
        return Ok(());
    }
    if let Some(parent) = env_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let base_dir = match env_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    let store_root = base_dir.join("vibeshare-data");
    let mut content = String::new();
    content.push_str(&format!("STORE_ROOT={}\n", display_path(&store_root)));
    content.push_str("BIND_HTTP=127.0.0.1:4741\n");
    content.push_str(&format!(
        "UPLOAD_DIR={}\n",
        display_path(&store_root.join("uploads"))
    ));
    content.push_str(&format!("UPLOAD_MAX_BYTES={DEFAULT_MAX_BYTES}\n"));
    content.push_str("CORS_ORIGINS=\n");
    fs::write(env_path, content)?;
    info!("wrote default configuration to {path}");
    Ok(())
}

fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Log to stderr so command output on stdout stays machine-readable.
#[cfg(not(test))]
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(not(test))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await
}

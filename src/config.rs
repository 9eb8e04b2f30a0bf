//! Configuration loading from `.env` files.

use std::{env, path::PathBuf};

use anyhow::{Context, Result};

use crate::upload::DEFAULT_MAX_BYTES;

/// Runtime settings derived from environment variables.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for all documents and indexes.
    pub store_root: PathBuf,
    /// HTTP bind address, e.g. `127.0.0.1:4741`.
    pub bind_http: String,
    /// Directory uploaded files are written to. Defaults to
    /// `<store_root>/uploads`.
    pub upload_dir: PathBuf,
    /// Maximum upload request size in bytes.
    pub upload_max_bytes: usize,
    /// Browser origins allowed by CORS; empty allows any.
    pub cors_origins: Vec<String>,
}

impl Settings {
    /// Load settings from the specified `.env` file.
    pub fn from_env(path: &str) -> Result<Self> {
        dotenvy::from_filename(path).context("reading env file")?;
        let store_root = PathBuf::from(env::var("STORE_ROOT").context("STORE_ROOT is not set")?);
        let bind_http = env::var("BIND_HTTP").context("BIND_HTTP is not set")?;
        let upload_dir = env::var("UPLOAD_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| store_root.join("uploads"));
        let upload_max_bytes = match env::var("UPLOAD_MAX_BYTES") {
            Ok(s) if !s.trim().is_empty() => s
                .trim()
                .parse()
                .with_context(|| format!("invalid UPLOAD_MAX_BYTES: {s}"))?,
            _ => DEFAULT_MAX_BYTES,
        };
        let cors_origins = csv_strings(env::var("CORS_ORIGINS").unwrap_or_default());
        Ok(Self {
            store_root,
            bind_http,
            upload_dir,
            upload_max_bytes,
            cors_origins,
        })
    }
}

/// Split a comma-separated string into trimmed string values.
pub fn csv_strings(input: impl AsRef<str>) -> Vec<String> {
    let s = input.as_ref();
    s.split(',')
        .filter_map(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}

/// Serializes tests that mutate process environment variables.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Every variable read by [`Settings::from_env`].
#[cfg(test)]
pub(crate) const ENV_VARS: [&str; 5] = [
    "STORE_ROOT",
    "BIND_HTTP",
    "UPLOAD_DIR",
    "UPLOAD_MAX_BYTES",
    "CORS_ORIGINS",
];

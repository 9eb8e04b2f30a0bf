//! Where uploaded files go, what they are called, and the multipart endpoint
//! that writes them.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{fs::OpenOptions, io::AsyncWriteExt};
use tracing::info;

use crate::{error::AppError, server::AppState};

/// Default request size limit for uploads: 10 MiB.
pub const DEFAULT_MAX_BYTES: usize = 10 * 1024 * 1024;

/// URL prefix under which stored files are served.
pub const PUBLIC_PREFIX: &str = "/files";

/// Destination directory and size limit for uploaded files.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub dir: PathBuf,
    pub max_bytes: usize,
}

impl UploadConfig {
    pub fn new(dir: PathBuf, max_bytes: usize) -> Self {
        Self { dir, max_bytes }
    }

    /// Ensure the destination directory exists.
    pub fn init(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating upload dir {}", self.dir.display()))
    }

    /// Stored name for a file: `{field}-{unix millis}{.ext}`.
    ///
    /// The extension comes from the client's filename, lowercased, and is
    /// dropped unless it is short and alphanumeric.
    pub fn filename_for(field: &str, original: &str, at: DateTime<Utc>) -> String {
        let mut name = format!("{}-{}", sanitize_field(field), at.timestamp_millis());
        if let Some(ext) = extension(original) {
            name.push('.');
            name.push_str(&ext);
        }
        name
    }
}

/// Insert `-{n}` before the extension of `filename`.
fn numbered(filename: &str, n: u32) -> String {
    match filename.split_once('.') {
        Some((stem, ext)) => format!("{stem}-{n}.{ext}"),
        None => format!("{filename}-{n}"),
    }
}

fn sanitize_field(field: &str) -> String {
    let cleaned: String = field
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if cleaned.is_empty() {
        "file".into()
    } else {
        cleaned
    }
}

fn extension(original: &str) -> Option<String> {
    let ext = Path::new(original).extension()?.to_str()?;
    let valid = !ext.is_empty() && ext.len() <= 16 && ext.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| ext.to_ascii_lowercase())
}

/// Write `data` under the first free name among `base`, `base-1`, `base-2`...
/// Names are claimed with `create_new`, so concurrent uploads never share one.
async fn write_new(dir: &Path, base: &str, data: &[u8]) -> anyhow::Result<String> {
    let mut filename = base.to_string();
    let mut n = 1;
    let (mut file, dest) = loop {
        let dest = dir.join(&filename);
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dest)
            .await
        {
            Ok(file) => break (file, dest),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                filename = numbered(base, n);
                n += 1;
            }
            Err(err) => {
                return Err(err).with_context(|| format!("creating {}", dest.display()));
            }
        }
    };
    let written = async {
        file.write_all(data).await?;
        file.flush().await
    }
    .await;
    if let Err(err) = written {
        let _ = tokio::fs::remove_file(&dest).await;
        return Err(err).with_context(|| format!("writing {}", dest.display()));
    }
    Ok(filename)
}

/// One stored file as reported back to the client.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredFile {
    /// Multipart field name the file arrived under.
    pub field: String,
    pub filename: String,
    /// URL path the file is served from, e.g. `/files/img-1700000000000.png`.
    pub path: String,
    pub size: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub files: Vec<StoredFile>,
}

/// Store every file part of a multipart body. Text parts are ignored.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut files = vec![];
    while let Some(field) = multipart.next_field().await? {
        let Some(original) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let field_name = field.name().unwrap_or("file").to_owned();
        let data = field.bytes().await?;

        let base = UploadConfig::filename_for(&field_name, &original, Utc::now());
        let filename = write_new(&state.uploads.dir, &base, &data).await?;
        info!(field = %field_name, file = %filename, size = data.len(), "stored upload");

        files.push(StoredFile {
            field: field_name,
            path: format!("{PUBLIC_PREFIX}/{filename}"),
            filename,
            size: data.len() as u64,
        });
    }
    if files.is_empty() {
        return Err(AppError::Validation("no file parts in upload".into()));
    }
    Ok((StatusCode::CREATED, Json(UploadResponse { files })))
}

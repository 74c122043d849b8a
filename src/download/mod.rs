//! Download the episodes listed in a report from the file host.
//!
//! Each id becomes `{base_url}/{id}?download`, saved as `{dir}/{id}.mp4`. Files that already
//! exist with content are skipped, so an interrupted run can simply be started again.

mod client;

pub use client::{PoliteClient, PoliteClientBuilder};

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File host API the collected ids belong to.
pub const DEFAULT_DOWNLOAD_BASE_URL: &str = "https://pixeldrain.com/api/file";

/// Default download folder name, created beside the report.
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloaded_episodes";

const EPISODE_EXTENSION: &str = "mp4";

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Network error: could not download {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP {status} when downloading: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid episode id '{0}'.")]
    InvalidId(String),
}

/// Outcome for one episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloaded { bytes: u64 },
    Skipped,
}

/// Download URL for an episode id.
pub fn download_url(base_url: &str, id: &str) -> String {
    format!("{}/{}?download", base_url.trim_end_matches('/'), id)
}

/// Destination path for an episode id. Ids with path separators or `..` are rejected.
pub fn episode_path(dir: &Path, id: &str) -> Result<PathBuf, DownloadError> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(DownloadError::InvalidId(id.to_string()));
    }
    Ok(dir.join(format!("{}.{}", id, EPISODE_EXTENSION)))
}

fn already_downloaded(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// Download one episode into `dir`. A partial file is removed when the transfer fails.
pub fn download_episode(
    client: &mut PoliteClient,
    base_url: &str,
    id: &str,
    dir: &Path,
) -> Result<DownloadStatus, DownloadError> {
    let path = episode_path(dir, id)?;
    if already_downloaded(&path) {
        log::warn!("Skipping {}: {} already exists", id, path.display());
        return Ok(DownloadStatus::Skipped);
    }

    let url = download_url(base_url, id);
    log::debug!("Downloading {} to {}", url, path.display());
    let mut response = client
        .get_with_retry(&url)
        .map_err(|e| DownloadError::Network {
            url: url.clone(),
            source: e,
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::HttpStatus {
            status: status.as_u16(),
            url,
        });
    }

    let io_err = |e: std::io::Error| DownloadError::Io {
        path: path.clone(),
        source: e,
    };
    let file = File::create(&path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    let copied = std::io::copy(&mut response, &mut writer).and_then(|n| writer.flush().map(|_| n));
    match copied {
        Ok(bytes) => Ok(DownloadStatus::Downloaded { bytes }),
        Err(e) => {
            drop(writer);
            if let Err(rm) = std::fs::remove_file(&path) {
                log::warn!("Could not remove partial file {}: {}", path.display(), rm);
            }
            Err(io_err(e))
        }
    }
}

/// Download every id in order, creating `dir` first. Stops at the first failure.
/// `progress` receives the 1-based position, the total and the id before each download.
pub fn download_all(
    client: &mut PoliteClient,
    base_url: &str,
    ids: &[String],
    dir: &Path,
    progress: Option<&dyn Fn(usize, usize, &str)>,
) -> Result<Vec<DownloadStatus>, DownloadError> {
    std::fs::create_dir_all(dir).map_err(|e| DownloadError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut statuses = Vec::with_capacity(ids.len());
    for (i, id) in ids.iter().enumerate() {
        if let Some(cb) = progress {
            cb(i + 1, ids.len(), id);
        }
        statuses.push(download_episode(client, base_url, id, dir)?);
    }
    Ok(statuses)
}

//! Persisted health check parameters (`checkInfo.json`).

use std::io;
use std::path::{Path, PathBuf};

use hostpilot_model::CheckParams;
use thiserror::Error;

/// File in the work directory holding the active [`CheckParams`].
pub const CHECK_INFO_FILE: &str = "checkInfo.json";

#[derive(Debug, Error)]
pub enum CheckParamsError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode check parameters: {0}")]
    Encode(#[from] serde_json::Error),
}

pub fn check_info_path(work_dir: &Path) -> PathBuf {
    work_dir.join(CHECK_INFO_FILE)
}

pub async fn save(work_dir: &Path, params: &CheckParams) -> Result<(), CheckParamsError> {
    let path = check_info_path(work_dir);
    let body = serde_json::to_vec_pretty(params)?;
    tokio::fs::create_dir_all(work_dir)
        .await
        .map_err(|source| CheckParamsError::Io {
            path: work_dir.to_path_buf(),
            source,
        })?;
    tokio::fs::write(&path, body)
        .await
        .map_err(|source| CheckParamsError::Io { path, source })
}

/// Saved parameters, or `None` if nothing was saved.
pub async fn load(work_dir: &Path) -> Result<Option<CheckParams>, CheckParamsError> {
    let path = check_info_path(work_dir);
    let body = match tokio::fs::read(&path).await {
        Ok(body) => body,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(CheckParamsError::Io { path, source }),
    };
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|source| CheckParamsError::Decode { path, source })
}

/// Remove saved parameters. Missing files are not an error.
pub async fn remove(work_dir: &Path) -> Result<(), CheckParamsError> {
    let path = check_info_path(work_dir);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CheckParamsError::Io { path, source }),
    }
}

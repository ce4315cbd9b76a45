//! Script resolution.
//!
//! Lifecycle scripts live in the work directory under their own name. A
//! script missing locally is fetched once from `repo_url + name` and cached
//! there; an existing file is always used as-is.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("invalid script name: '{0}'")]
    InvalidName(String),

    #[error("failed to fetch {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("failed to fetch {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ScriptError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| ScriptError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Where missing scripts come from.
#[async_trait]
pub trait ScriptSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ScriptError>;
}

/// Fetches scripts over HTTP.
pub struct HttpScriptSource {
    client: reqwest::Client,
}

impl HttpScriptSource {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ScriptSource for HttpScriptSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ScriptError> {
        let fetch_err = |e: reqwest::Error| ScriptError::Fetch {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(fetch_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScriptError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(fetch_err)?;
        Ok(body.to_vec())
    }
}

/// Resolves script names to paths in the work directory.
pub struct ScriptResolver {
    work_dir: PathBuf,
    source: Arc<dyn ScriptSource>,
    fetch_lock: Mutex<()>,
}

impl ScriptResolver {
    pub fn new(work_dir: impl Into<PathBuf>, source: Arc<dyn ScriptSource>) -> Self {
        Self {
            work_dir: work_dir.into(),
            source,
            fetch_lock: Mutex::new(()),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Path of `script_name`, fetching it from `repo_url` first if needed.
    #[instrument(skip(self))]
    pub async fn resolve(&self, script_name: &str, repo_url: &str) -> Result<PathBuf, ScriptError> {
        validate_name(script_name)?;
        let path = self.work_dir.join(script_name);

        // Serialized so concurrent requests fetch a script at most once.
        let _guard = self.fetch_lock.lock().await;

        if tokio::fs::try_exists(&path)
            .await
            .map_err(ScriptError::io(&path))?
        {
            debug!(path = %path.display(), "Script already present");
            return Ok(path);
        }

        tokio::fs::create_dir_all(&self.work_dir)
            .await
            .map_err(ScriptError::io(&self.work_dir))?;

        let url = format!("{repo_url}{script_name}");
        let body = self.source.fetch(&url).await?;

        let partial = self.work_dir.join(format!(".{script_name}.part"));
        tokio::fs::write(&partial, &body)
            .await
            .map_err(ScriptError::io(&partial))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(ScriptError::io(&path))?;

        info!(url = %url, path = %path.display(), bytes = body.len(), "Fetched script");
        Ok(path)
    }
}

fn validate_name(name: &str) -> Result<(), ScriptError> {
    let invalid = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains('/')
        || name.contains('\\');
    if invalid {
        return Err(ScriptError::InvalidName(name.to_string()));
    }
    Ok(())
}

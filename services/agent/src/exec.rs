//! Script execution.
//!
//! Scripts run as `sh <script> <args>` inside the work directory. Both output
//! streams are drained line by line while the process runs. Lines are read as
//! raw bytes and decoded lossily, so one badly encoded line never cuts the
//! stream short. Every line is logged, and optionally appended to an [`OutputCapture`] so the caller can
//! inspect what the script printed.

use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Errors from running a process.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("failed waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("{program} exited with {status}")]
    ExitStatus { program: String, status: ExitStatus },
}

/// Collected output lines of one run. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    buf: Arc<Mutex<String>>,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    async fn push_line(&self, line: &str) {
        let mut buf = self.buf.lock().await;
        buf.push_str(line);
        buf.push('\n');
    }

    pub async fn contents(&self) -> String {
        self.buf.lock().await.clone()
    }
}

/// Run `sh <script_path> [args]` in `work_dir`.
///
/// `args` is passed as a single argument; it is omitted when empty.
pub async fn run_script(
    script_path: &Path,
    args: &str,
    work_dir: &Path,
    capture: Option<&OutputCapture>,
) -> Result<(), ExecError> {
    let mut argv = vec![script_path.to_string_lossy().into_owned()];
    if !args.is_empty() {
        argv.push(args.to_string());
    }
    run("sh", &argv, work_dir, capture).await
}

/// Run `program` with `args` in `work_dir`, waiting for it to exit and for
/// both output streams to drain.
pub async fn run(
    program: &str,
    args: &[String],
    work_dir: &Path,
    capture: Option<&OutputCapture>,
) -> Result<(), ExecError> {
    debug!(program, ?args, work_dir = %work_dir.display(), "Spawning process");

    let mut child = Command::new(program)
        .args(args)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .map(|out| tokio::spawn(drain(out, "stdout", capture.cloned())));
    let stderr = child
        .stderr
        .take()
        .map(|err| tokio::spawn(drain(err, "stderr", capture.cloned())));

    for reader in [stdout, stderr].into_iter().flatten() {
        if let Err(e) = reader.await {
            warn!(error = %e, "Output reader task failed");
        }
    }

    let status = child.wait().await.map_err(|source| ExecError::Wait {
        program: program.to_string(),
        source,
    })?;

    if status.success() {
        Ok(())
    } else {
        Err(ExecError::ExitStatus {
            program: program.to_string(),
            status,
        })
    }
}

async fn drain<R>(reader: R, stream: &'static str, capture: Option<OutputCapture>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim_end_matches(['\n', '\r']);
                info!(stream, "{line}");
                if let Some(capture) = &capture {
                    capture.push_line(line).await;
                }
            }
            Err(e) => {
                warn!(stream, error = %e, "Failed reading process output");
                break;
            }
        }
    }
}

//! Terraform subprocess runner.
//!
//! Output is streamed through line by line and never inspected; only the
//! exit status decides success.
//!
//! Ctrl-C during a run is forwarded to the child through the shared process
//! group and recorded, so the run ends as interrupted once the child exits.
//! Listening for it installs tokio's signal handler for the rest of the
//! process: later Ctrl-C presses, including one during the state push or the
//! lock release that follow, no longer terminate terrascope; those steps
//! always run to completion.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Result, ToolError};

use super::invocation::{ToolInvocation, ToolOutcome, ToolRunner};

/// Runs terraform as a child process.
#[derive(Debug, Clone)]
pub struct TerraformRunner {
    /// Binary name or path.
    binary: String,
}

impl TerraformRunner {
    /// Creates a runner for `binary`.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    /// Locates the binary on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::NotInstalled` if no executable is found.
    pub fn check_installed(&self) -> Result<PathBuf> {
        find_executable(&self.binary).ok_or_else(|| {
            ToolError::NotInstalled {
                binary: self.binary.clone(),
            }
            .into()
        })
    }

    /// Returns the installed version, as reported by `-version`.
    ///
    /// # Errors
    ///
    /// Returns an error if the binary cannot be run.
    pub async fn version(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ToolError::Spawn {
                command: format!("{} -version", self.binary),
                message: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_version(&stdout).unwrap_or_default())
    }

    /// Fails unless the installed version equals `required`.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::Version` on mismatch.
    pub async fn check_version(&self, required: &str) -> Result<()> {
        let found = self.version().await?;
        if found != required.trim_start_matches('v') {
            return Err(ToolError::Version {
                binary: self.binary.clone(),
                required: required.to_string(),
                found,
            }
            .into());
        }
        debug!("{} version {found} matches", self.binary);
        Ok(())
    }
}

#[async_trait]
impl ToolRunner for TerraformRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutcome> {
        let command = invocation.display(&self.binary);
        info!("Running {command}");
        let started = Instant::now();

        let mut child = Command::new(&self.binary)
            .args(invocation.args())
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ToolError::Spawn {
                command: command.clone(),
                message: e.to_string(),
            })?;

        let stdout = child.stdout.take().map(|out| tokio::spawn(forward(out, tokio::io::stdout())));
        let stderr = child.stderr.take().map(|err| tokio::spawn(forward(err, tokio::io::stderr())));

        let mut interrupted = false;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = tokio::signal::ctrl_c(), if !interrupted => {
                    interrupted = true;
                    warn!("Interrupt received; waiting for {} to exit", self.binary);
                }
            }
        };

        for task in [stdout, stderr].into_iter().flatten() {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Output forwarding stopped: {e}"),
                Err(e) => debug!("Output forwarding task failed: {e}"),
            }
        }

        let status = status.map_err(|e| ToolError::Spawn {
            command: command.clone(),
            message: e.to_string(),
        })?;

        if interrupted {
            return Err(ToolError::Interrupted { command }.into());
        }

        if !status.success() {
            return Err(ToolError::Failed {
                command,
                code: status.code(),
            }
            .into());
        }

        Ok(ToolOutcome {
            command,
            duration: started.elapsed(),
        })
    }
}

/// Copies `reader` to `writer` line by line, expanding the escaped
/// newlines and quotes the tool prints inside diagnostics.
async fn forward<R, W>(reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        writer.write_all(unescape_line(&line).as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

/// Expands literal `\n` and `\"` sequences.
fn unescape_line(line: &str) -> String {
    line.replace("\\n", "\n").replace("\\\"", "\"")
}

/// Extracts `X.Y.Z` from output like `Terraform v0.11.14`.
fn parse_version(output: &str) -> Option<String> {
    let first = output.lines().next()?.trim();
    let version = first.rsplit('v').next()?.trim();
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

/// Searches `PATH` for an executable called `binary`. Paths containing a
/// separator are checked directly.
fn find_executable(binary: &str) -> Option<PathBuf> {
    let candidate = Path::new(binary);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|p| is_executable(p))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

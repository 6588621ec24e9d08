use crate::downloader::{Downloader, FormatOptions, InvocationOutcome, LineCallback};
use crate::errors::{AppError, Result};
use crate::utils::last_non_empty_line;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PROGRAM: &str = "spotdl";

/// Drives the `spotdl` command line tool.
pub struct SpotdlDownloader {
    program: String,
}

impl SpotdlDownloader {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        Self {
            program: if program.trim().is_empty() { DEFAULT_PROGRAM.to_string() } else { program },
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn build_command(&self, reference: &str, output_dir: &Path, options: &FormatOptions) -> Command {
        let mut command = Command::new(&self.program);
        command
            .arg(reference)
            .arg("--output")
            .arg(output_dir)
            .arg("--format")
            .arg(options.format.as_str())
            .arg("--bitrate")
            .arg(options.bitrate.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Forwards one complete output line. Returns `false` once the stream is done:
    /// at end of file, or after a read error, so the pipe gets dropped instead of
    /// filling up and blocking the child.
    fn handle_read(
        &self,
        read: std::io::Result<usize>,
        buf: &mut Vec<u8>,
        tail: &mut Option<String>,
        on_line: &LineCallback<'_>,
    ) -> bool {
        match read {
            Ok(0) => false,
            Ok(_) => {
                // spotdl may print titles in a non-UTF-8 console codepage
                let line = String::from_utf8_lossy(buf);
                let line = line.trim_end_matches(|c| c == '\n' || c == '\r');
                if let Some(last) = last_non_empty_line(line) {
                    *tail = Some(last);
                }
                on_line(line);
                buf.clear();
                true
            }
            Err(e) => {
                log::warn!("Failed to read output of {}: {}", self.program, e);
                buf.clear();
                false
            }
        }
    }

    fn spawn_error(&self, e: std::io::Error) -> AppError {
        match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                AppError::DownloaderNotFound(format!("{} ({})", self.program, e))
            }
            _ => AppError::Subprocess(format!("Failed to start {}: {}", self.program, e)),
        }
    }
}

/// Reads up to and including the next newline. A closed stream never resolves,
/// so its `select!` branch can stay in place.
async fn read_line<R: AsyncBufRead + Unpin>(reader: Option<&mut R>, buf: &mut Vec<u8>) -> std::io::Result<usize> {
    match reader {
        Some(reader) => reader.read_until(b'\n', buf).await,
        None => std::future::pending().await,
    }
}

impl Default for SpotdlDownloader {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

#[async_trait]
impl Downloader for SpotdlDownloader {
    async fn check_available(&self) -> Result<()> {
        let output = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::DownloaderBroken(format!(
                "{} --version failed: {}",
                self.program,
                last_non_empty_line(&stderr).unwrap_or_else(|| output.status.to_string())
            )));
        }

        let version = String::from_utf8_lossy(&output.stdout);
        log::info!(
            "Using {} {}",
            self.program,
            last_non_empty_line(&version).unwrap_or_default()
        );
        Ok(())
    }

    async fn invoke(
        &self,
        reference: &str,
        output_dir: &Path,
        options: &FormatOptions,
        on_line: &LineCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<InvocationOutcome> {
        if cancel.is_cancelled() {
            return Ok(InvocationOutcome::Interrupted);
        }

        log::debug!("Running {} {} --output {:?}", self.program, reference, output_dir);
        let mut child = self
            .build_command(reference, output_dir, options)
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Subprocess("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Subprocess("stderr was not captured".to_string()))?;
        let mut stdout = Some(BufReader::new(stdout));
        let mut stderr = Some(BufReader::new(stderr));
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut tail: Option<String> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::warn!("Cancelling {} for {}", self.program, reference);
                    if let Err(e) = child.kill().await {
                        log::debug!("Failed to kill {}: {}", self.program, e);
                    }
                    return Ok(InvocationOutcome::Interrupted);
                }
                read = read_line(stdout.as_mut(), &mut stdout_buf), if stdout.is_some() => {
                    if !self.handle_read(read, &mut stdout_buf, &mut tail, on_line) {
                        stdout = None;
                    }
                }
                read = read_line(stderr.as_mut(), &mut stderr_buf), if stderr.is_some() => {
                    if !self.handle_read(read, &mut stderr_buf, &mut tail, on_line) {
                        stderr = None;
                    }
                }
                status = child.wait(), if stdout.is_none() && stderr.is_none() => {
                    let status = status.map_err(|e| {
                        AppError::Subprocess(format!("Failed to wait for {}: {}", self.program, e))
                    })?;
                    log::debug!("{} {} finished with {}", self.program, reference, status);
                    return Ok(InvocationOutcome::Exited { code: status.code(), tail });
                }
            }
        }
    }

    fn get_name(&self) -> &str {
        "spotdl"
    }
}

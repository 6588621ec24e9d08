pub mod manager;
pub mod outcome;
pub mod progress;
pub mod strategies;
pub mod strategy;

use serde::{Deserialize, Serialize};
use crate::config::{AudioFormat, Bitrate};
use crate::errors::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One track to fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub track_id: String,
    pub display_name: String,
    pub artist_name: String,
}

impl DownloadRequest {
    pub fn new(track_id: impl Into<String>, display_name: impl Into<String>, artist_name: impl Into<String>) -> Self {
        Self {
            track_id: track_id.into(),
            display_name: display_name.into(),
            artist_name: artist_name.into(),
        }
    }

    pub fn label(&self) -> String {
        if self.artist_name.is_empty() {
            self.display_name.clone()
        } else {
            format!("{} - {}", self.display_name, self.artist_name)
        }
    }
}

/// Format options forwarded verbatim to the external downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub format: AudioFormat,
    pub bitrate: Bitrate,
}

pub const DEFAULT_CONCURRENCY: usize = 3;

/// One orchestration run.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub id: String,
    pub requests: Vec<Arc<DownloadRequest>>,
    pub output_directory: PathBuf,
    pub album_bulk_hint: Option<String>,
    /// Maximum number of simultaneous external invocations, never below 1.
    pub concurrency_limit: usize,
    pub format_options: FormatOptions,
}

impl DownloadJob {
    pub fn new(requests: Vec<DownloadRequest>, output_directory: impl Into<PathBuf>, format_options: FormatOptions) -> Self {
        Self {
            id: crate::utils::generate_job_id(),
            requests: requests.into_iter().map(Arc::new).collect(),
            output_directory: output_directory.into(),
            album_bulk_hint: None,
            concurrency_limit: DEFAULT_CONCURRENCY,
            format_options,
        }
    }

    pub fn with_bulk_hint(mut self, hint: Option<String>) -> Self {
        self.album_bulk_hint = hint.filter(|h| !h.trim().is_empty());
        self
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }
}

/// How a single external process invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// The process ran to completion. `code` is `None` when it was killed by a signal.
    Exited {
        code: Option<i32>,
        tail: Option<String>,
    },
    /// Cancelled before the process exited on its own.
    Interrupted,
}

impl InvocationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationOutcome::Exited { code: Some(0), .. })
    }

    /// Text describing a failed invocation: the last output line if there was one.
    pub fn failure_detail(&self) -> String {
        match self {
            InvocationOutcome::Interrupted => "interrupted".to_string(),
            InvocationOutcome::Exited { tail: Some(tail), .. } => tail.clone(),
            InvocationOutcome::Exited { code: Some(code), tail: None } => format!("exited with status {}", code),
            InvocationOutcome::Exited { code: None, tail: None } => "terminated by signal".to_string(),
        }
    }
}

/// Receives every line the external process writes, stdout and stderr merged.
pub type LineCallback<'a> = dyn Fn(&str) + Send + Sync + 'a;

/// The external downloader tool. Success is signalled only through the exit code.
#[async_trait::async_trait]
pub trait Downloader {
    /// Checked once per job before anything is dispatched.
    async fn check_available(&self) -> Result<()>;

    async fn invoke(
        &self,
        reference: &str,
        output_dir: &Path,
        options: &FormatOptions,
        on_line: &LineCallback<'_>,
        cancel: &CancellationToken,
    ) -> Result<InvocationOutcome>;

    fn get_name(&self) -> &str;
}

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Cannot create output directory {}: {source}", path.display())]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Downloader not found: {0}")]
    DownloaderNotFound(String),

    #[error("Downloader is not working: {0}")]
    DownloaderBroken(String),

    #[error("Downloader subprocess error: {0}")]
    Subprocess(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AppError {
    /// Errors raised before any download starts: the job never ran.
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            AppError::OutputDirectory { .. }
                | AppError::DownloaderNotFound(_)
                | AppError::DownloaderBroken(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

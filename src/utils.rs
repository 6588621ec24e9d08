use std::path::Path;
use crate::errors::{AppError, Result};
use log::info;

/// Sanitizes a filename by removing invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Creates a directory (and its parents) if it doesn't exist
pub async fn ensure_dir_exists(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }

    tokio::fs::create_dir_all(path)
        .await
        .map_err(|source| AppError::OutputDirectory {
            path: path.to_path_buf(),
            source,
        })?;
    info!("Created directory: {:?}", path);
    Ok(())
}

/// Returns the last line of `text` that is not blank, trimmed.
pub fn last_non_empty_line(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Generates a unique ID for a download job
pub fn generate_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

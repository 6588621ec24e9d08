use crate::api::CatalogReference;
use crate::config::{MAX_CONCURRENT_DOWNLOADS, MIN_CONCURRENT_DOWNLOADS};
use crate::errors::{AppError, Result};
use std::path::Path;
use url::Url;

/// Checks user-supplied values before a download job is built from them.
#[derive(Debug, Default)]
pub struct InputValidator;

impl InputValidator {
    pub fn new() -> Self {
        Self
    }

    /// Accepts open.spotify.com URLs, spotify: URIs and bare track IDs.
    pub fn validate_track_reference(&self, reference: &str) -> Result<CatalogReference> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(AppError::Validation("Track reference cannot be empty".to_string()));
        }

        if reference.contains("://") {
            let parsed_url = Url::parse(reference)
                .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;
            let host = parsed_url
                .host_str()
                .ok_or_else(|| AppError::Validation("URL must have a host".to_string()))?;
            if host != "open.spotify.com" {
                return Err(AppError::Validation(format!(
                    "Unsupported platform: {}. Only open.spotify.com links are supported",
                    host
                )));
            }
        }

        CatalogReference::parse(reference).map_err(|e| AppError::Validation(e.to_string()))
    }

    pub fn validate_concurrency(&self, value: usize) -> Result<usize> {
        if !(MIN_CONCURRENT_DOWNLOADS..=MAX_CONCURRENT_DOWNLOADS).contains(&value) {
            return Err(AppError::Validation(format!(
                "Concurrent downloads must be between {} and {}",
                MIN_CONCURRENT_DOWNLOADS, MAX_CONCURRENT_DOWNLOADS
            )));
        }
        Ok(value)
    }

    pub fn validate_retries(&self, value: u32) -> Result<u32> {
        if value == 0 {
            return Err(AppError::Validation("Retries must be at least 1".to_string()));
        }
        Ok(value)
    }

    pub fn validate_output_path(&self, path: &Path) -> Result<()> {
        let raw = path.to_string_lossy();
        if raw.trim().is_empty() {
            return Err(AppError::Validation("Download path cannot be empty".to_string()));
        }

        if raw.contains('\0') {
            return Err(AppError::Validation("Null bytes not allowed in file path".to_string()));
        }

        if path.exists() && !path.is_dir() {
            return Err(AppError::Validation(format!("{} is not a directory", path.display())));
        }

        Ok(())
    }

    /// Turns a folder name into a single safe path component.
    pub fn sanitize_folder_name(&self, name: &str) -> Result<String> {
        let sanitized = crate::utils::sanitize_filename(name);

        // Remove leading/trailing dots and spaces
        let sanitized = sanitized.trim_matches(|c: char| c == '.' || c.is_whitespace());

        if sanitized.is_empty() {
            return Err(AppError::Validation("Folder name becomes empty after sanitization".to_string()));
        }

        // Limit length
        if sanitized.chars().count() > 255 {
            let truncated: String = sanitized.chars().take(252).collect();
            Ok(format!("{}...", truncated))
        } else {
            Ok(sanitized.to_string())
        }
    }
}

use crate::errors::{AppError, Result};
use crate::utils::ensure_dir_exists;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "ogg", "m4a", "wav", "opus"];

/// A previously downloaded album folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumEntry {
    pub name: String,
    pub artist: String,
    pub path: PathBuf,
    pub tracks: usize,
    pub size_mb: f64,
    pub modified: Option<DateTime<Local>>,
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Splits an `Artist - Album` folder name. Folders without the separator get an unknown artist.
pub fn parse_album_folder(folder: &str) -> (String, String) {
    match folder.split_once(" - ") {
        Some((artist, album)) => (artist.trim().to_string(), album.trim().to_string()),
        None => ("Unknown".to_string(), folder.to_string()),
    }
}

/// Lists sub-directories of `download_dir` that contain audio files, newest first.
/// A missing download directory is created and yields an empty list.
pub async fn scan_existing_albums(download_dir: &Path) -> Result<Vec<AlbumEntry>> {
    if !download_dir.exists() {
        ensure_dir_exists(download_dir).await?;
        return Ok(Vec::new());
    }

    let mut albums = Vec::new();
    let mut entries = tokio::fs::read_dir(download_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let album_path = entry.path();
        if !entry.file_type().await?.is_dir() {
            continue;
        }

        let mut tracks = 0;
        let mut total_size = 0u64;
        let mut files = tokio::fs::read_dir(&album_path).await?;
        while let Some(file) = files.next_entry().await? {
            let metadata = file.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            total_size += metadata.len();
            if is_audio_file(&file.path()) {
                tracks += 1;
            }
        }

        if tracks == 0 {
            continue;
        }

        let folder = entry.file_name().to_string_lossy().to_string();
        let (artist, name) = parse_album_folder(&folder);
        let modified = entry
            .metadata()
            .await
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Local>::from);

        albums.push(AlbumEntry {
            name,
            artist,
            path: album_path,
            tracks,
            size_mb: (total_size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            modified,
        });
    }

    albums.sort_by(|a, b| b.modified.cmp(&a.modified));
    log::info!("Found {} albums in {:?}", albums.len(), download_dir);
    Ok(albums)
}

/// Picks an album by its 1-based position in the listing, or by folder or album name
/// (case-insensitive).
pub fn find_album<'a>(albums: &'a [AlbumEntry], target: &str) -> Result<&'a AlbumEntry> {
    let target = target.trim();
    if let Ok(number) = target.parse::<usize>() {
        return number
            .checked_sub(1)
            .and_then(|i| albums.get(i))
            .ok_or_else(|| AppError::InvalidInput(format!("No album number {} (found {})", number, albums.len())));
    }

    albums
        .iter()
        .find(|album| {
            let folder = album.path.file_name().map(|f| f.to_string_lossy()).unwrap_or_default();
            folder.eq_ignore_ascii_case(target) || album.name.eq_ignore_ascii_case(target)
        })
        .ok_or_else(|| AppError::InvalidInput(format!("No album named '{}'", target)))
}

/// Removes an album folder and everything in it.
pub async fn delete_album(album: &AlbumEntry) -> Result<()> {
    tokio::fs::remove_dir_all(&album.path).await.map_err(|e| {
        AppError::IoError(format!("Failed to delete {}: {}", album.path.display(), e))
    })?;
    log::info!("Deleted album {} - {} ({} tracks)", album.artist, album.name, album.tracks);
    Ok(())
}

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::api::ReferenceKind;
use crate::cli::{ConfigSetArgs, DownloadArgs};
use crate::config::AppConfig;
use crate::display;
use crate::downloader::manager::{DownloadManager, ManagerSettings};
use crate::downloader::outcome::DownloadReport;
use crate::downloader::progress::ProgressSink;
use crate::downloader::{DownloadJob, DownloadRequest, Downloader, FormatOptions};
use crate::errors::{AppError, Result};
use crate::library::{self, AlbumEntry};
use crate::security::InputValidator;

/// Everything needed to describe one download run.
#[derive(Debug, Clone)]
pub struct JobParams {
    pub requests: Vec<DownloadRequest>,
    pub output_dir: PathBuf,
    pub album_reference: Option<String>,
    pub concurrency: usize,
    pub format_options: FormatOptions,
}

/// Runs one job to completion and returns the caller-facing report.
///
/// Setup failures (unusable output directory, missing downloader) come back
/// as `Err`; everything else, including interruption, is in the report.
pub async fn run_download_job(
    downloader: Arc<dyn Downloader + Send + Sync>,
    settings: ManagerSettings,
    params: JobParams,
    progress: ProgressSink,
    cancel: CancellationToken,
) -> Result<DownloadReport> {
    let job = DownloadJob::new(params.requests, params.output_dir, params.format_options)
        .with_bulk_hint(params.album_reference)
        .with_concurrency(crate::config::clamp_concurrency(params.concurrency));

    let manager = DownloadManager::new(downloader, settings);
    let outcome = manager.run(job, progress, cancel).await?;
    Ok(outcome.to_report())
}

/// Handler for `download`: merges flags over the saved config, builds the job and runs it.
/// Progress bars are drawn only when `show_progress` is set and the report is not JSON.
pub async fn download(
    config: &AppConfig,
    args: DownloadArgs,
    downloader: Arc<dyn Downloader + Send + Sync>,
    show_progress: bool,
    cancel: CancellationToken,
) -> Result<DownloadReport> {
    let validator = InputValidator::new();

    let mut requests = Vec::new();
    for reference in &args.references {
        let parsed = validator.validate_track_reference(reference)?;
        if parsed.kind != ReferenceKind::Track {
            return Err(AppError::InvalidInput(format!(
                "{} is a {}, pass it with --album instead",
                reference,
                parsed.kind.as_str()
            )));
        }
        requests.push(DownloadRequest::new(reference.trim(), parsed.id, ""));
    }

    if let Some(csv_path) = &args.csv {
        let imported = read_csv_tracks(csv_path).await?;
        log::info!("Imported {} tracks from {:?}", imported.len(), csv_path);
        requests.extend(imported);
    }

    let album_reference = match &args.album {
        Some(album) => {
            validator.validate_track_reference(album)?;
            Some(album.trim().to_string())
        }
        None => None,
    };

    // Without a track list the album itself is the only thing to fetch.
    if requests.is_empty() {
        if let Some(album) = &album_reference {
            requests.push(DownloadRequest::new(album.clone(), "Entire album", ""));
        }
    }

    let mut output_dir = args.output.clone().unwrap_or_else(|| config.download_path.clone());
    if let Some(folder) = &args.folder {
        output_dir = output_dir.join(validator.sanitize_folder_name(folder)?);
    }
    validator.validate_output_path(&output_dir)?;

    let concurrency = match args.threads {
        Some(threads) => validator.validate_concurrency(threads)?,
        None => config.max_concurrent_downloads,
    };

    let mut settings = ManagerSettings::from(config);
    if let Some(retries) = args.retries {
        settings.max_retries = validator.validate_retries(retries)?;
    }

    let params = JobParams {
        requests,
        output_dir,
        album_reference,
        concurrency,
        format_options: FormatOptions {
            format: args.format.unwrap_or(config.audio_format),
            bitrate: args.bitrate.unwrap_or(config.bitrate),
        },
    };

    if args.json || !show_progress {
        return run_download_job(downloader, settings, params, ProgressSink::disabled(), cancel).await;
    }

    let (sink, rx) = ProgressSink::channel();
    let renderer = tokio::spawn(display::render_progress(rx));
    let report = run_download_job(downloader, settings, params, sink, cancel).await;
    if let Err(e) = renderer.await {
        log::debug!("Progress renderer stopped: {}", e);
    }
    report
}

#[derive(Debug, Deserialize)]
struct CsvTrack {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    artist: Option<String>,
}

/// Reads a track list with `id,name,artist` headers. Extra columns are ignored,
/// rows without an id are skipped.
pub async fn read_csv_tracks(file_path: &Path) -> Result<Vec<DownloadRequest>> {
    let content = tokio::fs::read_to_string(file_path)
        .await
        .map_err(|e| AppError::IoError(format!("Failed to read CSV file {:?}: {}", file_path, e)))?;

    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = csv_reader.headers()?.clone();
    if !headers.iter().any(|h| h == "id") {
        return Err(AppError::InvalidInput(format!("{:?} has no 'id' column", file_path)));
    }

    let mut tracks = Vec::new();
    for (row, result) in csv_reader.deserialize::<CsvTrack>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                log::warn!("Failed to parse CSV record {}: {}", row + 1, e);
                continue;
            }
        };

        let Some(id) = record.id.filter(|id| !id.is_empty()) else {
            log::warn!("Skipping CSV record {}: no track id", row + 1);
            continue;
        };

        let name = record.name.filter(|n| !n.is_empty()).unwrap_or_else(|| id.clone());
        let artist = record.artist.unwrap_or_default().replace(';', ", ");
        tracks.push(DownloadRequest::new(id, name, artist));
    }

    Ok(tracks)
}

pub fn show_config(config: &AppConfig) -> Result<String> {
    Ok(serde_json::to_string_pretty(config)?)
}

/// Applies `config set` flags to `config`, validating each one.
pub fn apply_config_update(config: &mut AppConfig, update: &ConfigSetArgs) -> Result<()> {
    let validator = InputValidator::new();

    if let Some(path) = &update.output {
        validator.validate_output_path(path)?;
        config.download_path = path.clone();
    }

    if let Some(threads) = update.threads {
        config.max_concurrent_downloads = validator.validate_concurrency(threads)?;
    }

    if let Some(format) = update.format {
        config.audio_format = format;
    }

    if let Some(bitrate) = update.bitrate {
        config.bitrate = bitrate;
    }

    if let Some(retries) = update.retries {
        config.max_retries = validator.validate_retries(retries)?;
    }

    if let Some(downloader) = &update.downloader {
        if downloader.trim().is_empty() {
            return Err(AppError::Validation("Downloader path cannot be empty".to_string()));
        }
        config.downloader_path = downloader.trim().to_string();
    }

    Ok(())
}

pub fn update_config(config: &mut AppConfig, update: &ConfigSetArgs) -> Result<()> {
    apply_config_update(config, update)?;
    config.save()?;
    Ok(())
}

pub async fn list_library(config: &AppConfig) -> Result<Vec<AlbumEntry>> {
    library::scan_existing_albums(&config.download_path).await
}

/// Handler for `library delete`. Without `confirmed` nothing is touched.
pub async fn delete_library_album(config: &AppConfig, target: &str, confirmed: bool) -> Result<AlbumEntry> {
    let albums = list_library(config).await?;
    let album = library::find_album(&albums, target)?.clone();

    if !confirmed {
        return Err(AppError::Validation(format!(
            "This deletes {} ({} tracks). Re-run with --yes to confirm",
            album.path.display(),
            album.tracks
        )));
    }

    library::delete_album(&album).await?;
    Ok(album)
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use crate::errors::{AppError, Result};

pub const MIN_CONCURRENT_DOWNLOADS: usize = 1;
pub const MAX_CONCURRENT_DOWNLOADS: usize = 10;

const ENV_PREFIX: &str = "SPOTIFY_BURNER";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub download_path: PathBuf,
    pub max_concurrent_downloads: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub audio_format: AudioFormat,
    pub bitrate: Bitrate,
    pub downloader_path: String,
    /// Share of tracks that must succeed for a partial download to count as a success.
    pub min_success_ratio: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Mp3,
    Flac,
    Ogg,
    M4a,
    Opus,
    Wav,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Bitrate {
    #[serde(rename = "128k")]
    #[value(name = "128k")]
    Kbps128,
    #[serde(rename = "192k")]
    #[value(name = "192k")]
    Kbps192,
    #[serde(rename = "256k")]
    #[value(name = "256k")]
    Kbps256,
    #[serde(rename = "320k")]
    #[value(name = "320k")]
    Kbps320,
    #[serde(rename = "best")]
    #[value(name = "best")]
    Best,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_path: default_download_path(),
            max_concurrent_downloads: 3,
            max_retries: 3,
            retry_delay_ms: 2000,
            audio_format: AudioFormat::Mp3,
            bitrate: Bitrate::Kbps320,
            downloader_path: "spotdl".to_string(),
            min_success_ratio: 0.5,
        }
    }
}

fn default_download_path() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("Music").join("SpotifyDownloads"))
        .unwrap_or_else(|| PathBuf::from("./downloads"))
}

impl AudioFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Flac => "flac",
            AudioFormat::Ogg => "ogg",
            AudioFormat::M4a => "m4a",
            AudioFormat::Opus => "opus",
            AudioFormat::Wav => "wav",
        }
    }
}

impl Bitrate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bitrate::Kbps128 => "128k",
            Bitrate::Kbps192 => "192k",
            Bitrate::Kbps256 => "256k",
            Bitrate::Kbps320 => "320k",
            Bitrate::Best => "best",
        }
    }
}

impl AppConfig {
    /// Loads the user config, falling back to defaults when the file is unreadable.
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => Ok(config),
                Err(e) => {
                    log::error!("Config file {:?} is corrupted, using defaults: {}", config_path, e);
                    Ok(AppConfig::default())
                }
            }
        } else {
            let config = AppConfig::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Layers the JSON file (if any) and `SPOTIFY_BURNER_*` environment
    /// variables over the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        Ok(config.normalized())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(config_dir) = config_path.parent() {
            if !config_dir.exists() {
                std::fs::create_dir_all(config_dir)?;
            }
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        log::info!("Configuration saved to {:?}", config_path);
        Ok(())
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config(config::ConfigError::Message("Could not find config directory".to_string())))?;

        Ok(config_dir.join("spotify-burner").join("config.json"))
    }

    /// Clamps values the settings menu never allowed out of range.
    pub fn normalized(mut self) -> Self {
        self.max_concurrent_downloads = clamp_concurrency(self.max_concurrent_downloads);
        self.max_retries = self.max_retries.max(1);
        if !(0.0..=1.0).contains(&self.min_success_ratio) {
            log::warn!("min_success_ratio {} out of range, using 0.5", self.min_success_ratio);
            self.min_success_ratio = 0.5;
        }
        self
    }

    pub fn retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.retry_delay_ms)
    }
}

pub fn clamp_concurrency(value: usize) -> usize {
    value.clamp(MIN_CONCURRENT_DOWNLOADS, MAX_CONCURRENT_DOWNLOADS)
}

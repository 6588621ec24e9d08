//! Command-line surface.

use crate::config::{AudioFormat, Bitrate};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "spotify-burner")]
#[command(about = "Download Spotify tracks and albums through spotdl")]
#[command(version)]
pub struct Cli {
    /// More output (-v info, -vv debug)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Download tracks, or a whole album
    Download(DownloadArgs),

    /// Show or change saved settings
    #[command(subcommand)]
    Config(ConfigCommand),

    /// List or delete albums already in the download directory
    Library {
        #[command(subcommand)]
        command: Option<LibraryCommand>,
    },
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum LibraryCommand {
    /// List albums, newest first (the default)
    List,
    /// Delete an album folder
    Delete {
        /// Album number from `library list`, or its name
        target: String,

        /// Delete without asking
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct DownloadArgs {
    /// Track URLs, spotify: URIs or track IDs
    pub references: Vec<String>,

    /// CSV file with id,name,artist columns
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,

    /// Download directory (defaults to the configured one)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Sub-folder of the download directory, e.g. "Artist - Album"
    #[arg(long, value_name = "NAME")]
    pub folder: Option<String>,

    /// Album reference tried as a single bulk download first
    #[arg(long, value_name = "REF")]
    pub album: Option<String>,

    /// Concurrent downloads (1-10)
    #[arg(short = 't', long, value_name = "N")]
    pub threads: Option<usize>,

    #[arg(long, value_enum)]
    pub format: Option<AudioFormat>,

    #[arg(long, value_enum)]
    pub bitrate: Option<Bitrate>,

    /// Attempts per track
    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the current settings
    Show,
    /// Change and save settings
    Set(ConfigSetArgs),
    /// Print where the settings file lives
    Path,
}

#[derive(Args, Debug, Default)]
pub struct ConfigSetArgs {
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,

    #[arg(long, value_enum)]
    pub format: Option<AudioFormat>,

    #[arg(long, value_enum)]
    pub bitrate: Option<Bitrate>,

    #[arg(long, value_name = "N")]
    pub retries: Option<u32>,

    /// Path or name of the spotdl executable
    #[arg(long, value_name = "PATH")]
    pub downloader: Option<String>,
}

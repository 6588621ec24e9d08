mod api;
mod cli;
mod commands;
mod config;
mod display;
mod downloader;
mod errors;
mod library;
mod security;
mod utils;

use clap::Parser;
use log::{info, warn};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands, ConfigCommand, LibraryCommand};
use downloader::strategies::SpotdlDownloader;
use errors::AppError;

const EXIT_FAILURE: u8 = 1;
const EXIT_SETUP_FAILURE: u8 = 2;

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };

    // RUST_LOG wins over -v
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn install_hint(program: &str) {
    eprintln!("Could not run '{}'. Install spotdl with:", program);
    eprintln!("    pip install spotdl");
    eprintln!("or point to it with: spotify-burner config set --downloader /path/to/spotdl");
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    info!("Starting Spotify Burner");

    let mut config = match config::AppConfig::load() {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            config::AppConfig::default()
        }
    };

    match cli.command {
        Commands::Download(args) => {
            let json = args.json;
            let downloader = Arc::new(SpotdlDownloader::new(config.downloader_path.clone()));
            // log lines would tear through the bars
            let show_progress = cli.verbose == 0 && std::env::var_os("RUST_LOG").is_none();

            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, stopping downloads...");
                    trigger.cancel();
                }
            });

            match commands::download(&config, args, downloader.clone(), show_progress, cancel).await {
                Ok(report) => {
                    if json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        display::print_report(&report);
                    }
                    if !report.success {
                        return Ok(ExitCode::from(EXIT_FAILURE));
                    }
                }
                Err(e) if e.is_setup_failure() => {
                    eprintln!("Error: {}", e);
                    if matches!(e, AppError::DownloaderNotFound(_) | AppError::DownloaderBroken(_)) {
                        install_hint(downloader.program());
                    }
                    return Ok(ExitCode::from(EXIT_SETUP_FAILURE));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Config(ConfigCommand::Show) => {
            println!("{}", commands::show_config(&config)?);
        }
        Commands::Config(ConfigCommand::Set(update)) => {
            commands::update_config(&mut config, &update)?;
            println!("Settings saved.");
        }
        Commands::Config(ConfigCommand::Path) => {
            println!("{}", config::AppConfig::get_config_path()?.display());
        }
        Commands::Library { command: None | Some(LibraryCommand::List) } => {
            let albums = commands::list_library(&config).await?;
            display::print_albums(&albums);
        }
        Commands::Library { command: Some(LibraryCommand::Delete { target, yes }) } => {
            let album = commands::delete_library_album(&config, &target, yes).await?;
            println!("Deleted {}", album.path.display());
        }
    }

    Ok(ExitCode::SUCCESS)
}

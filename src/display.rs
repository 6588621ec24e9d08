//! Terminal rendering of job progress and results.
//!
//! Presentation only: consumes `ProgressEvent`s, never influences the outcome.

use crate::downloader::outcome::DownloadReport;
use crate::downloader::progress::ProgressEvent;
use crate::downloader::strategy::Strategy;
use crate::library::AlbumEntry;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, IsTerminal};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn overall_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn track_style() -> ProgressStyle {
    ProgressStyle::with_template("  {spinner} {wide_msg} {bar:20} {pos:>3}%")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

struct JobDisplay {
    multi: MultiProgress,
    overall: Option<ProgressBar>,
    tracks: HashMap<usize, ProgressBar>,
    labels: HashMap<usize, String>,
    finished: u64,
}

impl JobDisplay {
    fn new() -> Self {
        let target = if io::stderr().is_terminal() {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        Self {
            multi: MultiProgress::with_draw_target(target),
            overall: None,
            tracks: HashMap::new(),
            labels: HashMap::new(),
            finished: 0,
        }
    }

    fn handle(&mut self, event: ProgressEvent) {
        match event {
            ProgressEvent::JobStarted { total, strategy } => {
                let bar = self.multi.add(ProgressBar::new(total as u64));
                bar.set_style(overall_style());
                bar.enable_steady_tick(Duration::from_millis(120));
                bar.set_message(match strategy {
                    Strategy::BulkThenPerTrack => "downloading album",
                    Strategy::PerTrack => "downloading tracks",
                });
                self.overall = Some(bar);
            }
            ProgressEvent::BulkOutput(line) => {
                if let Some(bar) = &self.overall {
                    bar.set_message(line.trim().to_string());
                }
            }
            ProgressEvent::FallingBack { reason } => {
                let _ = self
                    .multi
                    .println(format!("Album download had issues ({}), trying tracks one by one", reason));
                if let Some(bar) = &self.overall {
                    bar.set_message("downloading tracks");
                }
            }
            ProgressEvent::TrackStarted { index, label } => {
                let bar = self.multi.add(ProgressBar::new(100));
                bar.set_style(track_style());
                bar.set_message(label.clone());
                self.tracks.insert(index, bar);
                self.labels.insert(index, label);
            }
            ProgressEvent::TrackProgress { index, percent } => {
                if let Some(bar) = self.tracks.get(&index) {
                    bar.set_position(percent.round() as u64);
                }
            }
            ProgressEvent::TrackTick { index } => {
                if let Some(bar) = self.tracks.get(&index) {
                    bar.tick();
                }
            }
            ProgressEvent::TrackRetry { index, attempt, error } => {
                let label = self.labels.get(&index).cloned().unwrap_or_default();
                let _ = self
                    .multi
                    .println(format!("Retrying {} after attempt {}: {}", label, attempt, error));
            }
            ProgressEvent::TrackFinished { index, succeeded } => {
                if let Some(bar) = self.tracks.remove(&index) {
                    bar.finish_and_clear();
                    self.multi.remove(&bar);
                }
                let label = self.labels.remove(&index).unwrap_or_default();
                let mark = if succeeded { "✓" } else { "✗" };
                let _ = self.multi.println(format!("{} {}", mark, label));
                self.finished += 1;
                if let Some(bar) = &self.overall {
                    bar.set_position(self.finished);
                }
            }
        }
    }

    fn finish(self) {
        for bar in self.tracks.values() {
            bar.finish_and_clear();
        }
        if let Some(bar) = self.overall {
            bar.finish_and_clear();
        }
    }
}

/// Renders events until every sender is dropped.
pub async fn render_progress(mut rx: UnboundedReceiver<ProgressEvent>) {
    let mut display = JobDisplay::new();
    while let Some(event) = rx.recv().await {
        display.handle(event);
    }
    display.finish();
}

pub fn print_report(report: &DownloadReport) {
    if report.interrupted {
        println!("Download interrupted.");
    }
    println!("Downloaded {} of {} tracks", report.succeeded, report.total);

    if !report.failures.is_empty() {
        println!("Failed tracks:");
        for failure in &report.failures {
            println!("  - {}: {}", failure.name, failure.error);
        }
    }

    if report.success {
        println!("Download completed.");
    } else {
        println!("Download failed.");
    }
}

pub fn print_albums(albums: &[AlbumEntry]) {
    if albums.is_empty() {
        println!("No albums found in your download directory.");
        return;
    }

    println!("Found {} existing albums:", albums.len());
    println!("{:>3}  {:<30} {:<30} {:>6} {:>10} {:>10}", "#", "Album", "Artist", "Tracks", "Size (MB)", "Date");
    for (i, album) in albums.iter().enumerate() {
        let date = album
            .modified
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        println!(
            "{:>3}  {:<30} {:<30} {:>6} {:>10.2} {:>10}",
            i + 1,
            album.name,
            album.artist,
            album.tracks,
            album.size_mb,
            date
        );
    }
}

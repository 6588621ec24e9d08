//! Best-effort progress signals parsed from downloader output.
//!
//! Nothing here feeds the pass/fail decision; it only drives the display.

use regex::Regex;
use std::sync::OnceLock;
use tokio::sync::mpsc;

use super::strategy::Strategy;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    JobStarted { total: usize, strategy: Strategy },
    BulkOutput(String),
    FallingBack { reason: String },
    TrackStarted { index: usize, label: String },
    TrackProgress { index: usize, percent: f32 },
    TrackTick { index: usize },
    TrackRetry { index: usize, attempt: u32, error: String },
    TrackFinished { index: usize, succeeded: bool },
}

/// Sending half handed to the orchestrator. A disabled sink drops everything.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // receiver gone means nobody is rendering; not an error
            let _ = tx.send(event);
        }
    }
}

fn percent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d{1,3}(?:\.\d+)?)\s*%").expect("static regex"))
}

/// First percentage-like substring in `line`, if it lies within 0..=100.
pub fn parse_percentage(line: &str) -> Option<f32> {
    percent_pattern()
        .captures_iter(line)
        .filter_map(|c| c[1].parse::<f32>().ok())
        .find(|p| (0.0..=100.0).contains(p))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressSignal {
    Percent(f32),
    Tick,
}

/// Keeps a track's displayed percentage monotonic across noisy output.
#[derive(Debug, Default)]
pub struct TrackProgress {
    current: f32,
}

impl TrackProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the line carries a percentage that would move progress backwards.
    pub fn observe(&mut self, line: &str) -> Option<ProgressSignal> {
        match parse_percentage(line) {
            Some(percent) if percent > self.current => {
                self.current = percent;
                Some(ProgressSignal::Percent(percent))
            }
            Some(_) => None,
            None => Some(ProgressSignal::Tick),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_progress_lines() {
        assert_eq!(parse_percentage("Downloading: 45%"), Some(45.0));
        assert_eq!(parse_percentage("[download]  12.5% of 3.4MiB"), Some(12.5));
        assert_eq!(parse_percentage("100 % done"), Some(100.0));
        assert_eq!(parse_percentage("Found 12 songs"), None);
        assert_eq!(parse_percentage("weird 250% then 30%"), Some(30.0));
    }

    #[test]
    fn tracker_is_monotonic() {
        let mut tracker = TrackProgress::new();
        assert_eq!(tracker.observe("10%"), Some(ProgressSignal::Percent(10.0)));
        assert_eq!(tracker.observe("5%"), None);
        assert_eq!(tracker.observe("Processing query"), Some(ProgressSignal::Tick));
        assert_eq!(tracker.observe("80%"), Some(ProgressSignal::Percent(80.0)));
        assert_eq!(tracker.observe("80%"), None);
    }

    #[tokio::test]
    async fn sink_delivers_events_in_order() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.emit(ProgressEvent::TrackTick { index: 0 });
        sink.emit(ProgressEvent::TrackFinished { index: 0, succeeded: true });
        drop(sink);

        assert_eq!(rx.recv().await, Some(ProgressEvent::TrackTick { index: 0 }));
        assert_eq!(rx.recv().await, Some(ProgressEvent::TrackFinished { index: 0, succeeded: true }));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn disabled_sink_swallows_events() {
        ProgressSink::disabled().emit(ProgressEvent::BulkOutput("ignored".to_string()));
    }
}

use crate::config::AppConfig;
use crate::downloader::outcome::{JobOutcome, SuccessPolicy, TaskResult};
use crate::downloader::progress::{ProgressEvent, ProgressSignal, ProgressSink, TrackProgress};
use crate::downloader::strategy::{Strategy, StrategyPhase};
use crate::downloader::{DownloadJob, DownloadRequest, Downloader, FormatOptions, InvocationOutcome};
use crate::errors::Result;
use crate::utils::ensure_dir_exists;
use log::{debug, error, info, warn};
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

type SharedDownloader = Arc<dyn Downloader + Send + Sync>;
type RequestQueue = Arc<Mutex<VecDeque<(usize, Arc<DownloadRequest>)>>>;

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub policy: SuccessPolicy,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            policy: SuccessPolicy::default(),
        }
    }
}

impl From<&AppConfig> for ManagerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            retry_delay: config.retry_delay(),
            policy: SuccessPolicy::new(config.min_success_ratio),
        }
    }
}

/// Runs download jobs against an external downloader with a bounded worker pool.
pub struct DownloadManager {
    downloader: SharedDownloader,
    settings: ManagerSettings,
    active_downloads: Arc<Mutex<usize>>,
}

/// Everything a worker needs, shared read-only between workers.
struct WorkerContext {
    downloader: SharedDownloader,
    output_dir: PathBuf,
    options: FormatOptions,
    settings: ManagerSettings,
    progress: ProgressSink,
    cancel: CancellationToken,
    active_downloads: Arc<Mutex<usize>>,
}

impl DownloadManager {
    pub fn new(downloader: SharedDownloader, settings: ManagerSettings) -> Self {
        Self {
            downloader,
            settings,
            active_downloads: Arc::new(Mutex::new(0)),
        }
    }

    /// Number of external invocations currently running.
    #[cfg(test)]
    pub async fn active_downloads(&self) -> usize {
        *self.active_downloads.lock().await
    }

    /// Downloads every request of `job` into its output directory.
    ///
    /// Setup problems (output directory, missing downloader) are returned as
    /// errors before anything is invoked. Everything after that, including
    /// cancellation, ends up in the returned `JobOutcome`: each request gets
    /// exactly one `TaskResult`.
    pub async fn run(&self, job: DownloadJob, progress: ProgressSink, cancel: CancellationToken) -> Result<JobOutcome> {
        ensure_dir_exists(&job.output_directory).await?;

        if job.requests.is_empty() {
            info!("Job {} has no tracks, nothing to download", job.id);
            return Ok(JobOutcome::empty(self.settings.policy));
        }

        self.downloader.check_available().await?;

        let strategy = Strategy::for_job(&job);
        info!(
            "Job {}: downloading {} tracks with {} to {:?} ({:?}, up to {} at a time)",
            job.id,
            job.requests.len(),
            self.downloader.get_name(),
            job.output_directory,
            strategy,
            job.concurrency_limit
        );
        progress.emit(ProgressEvent::JobStarted { total: job.requests.len(), strategy });

        let mut phase = StrategyPhase::NotAttempted;
        let mut results = Vec::new();

        if let (Strategy::BulkThenPerTrack, Some(hint)) = (strategy, job.album_bulk_hint.as_deref()) {
            phase = self.attempt_bulk(&job, hint, &progress, &cancel).await;
            match phase {
                StrategyPhase::BulkSucceeded => {
                    results = job
                        .requests
                        .iter()
                        .enumerate()
                        .map(|(index, request)| TaskResult::success(index, request.clone(), 1))
                        .collect();
                }
                StrategyPhase::BulkInterrupted => {
                    results = job
                        .requests
                        .iter()
                        .enumerate()
                        .map(|(index, request)| TaskResult::interrupted(index, request.clone(), 1))
                        .collect();
                }
                _ => {}
            }
        }

        if phase.needs_per_track() {
            results = self.dispatch_per_track(&job, &progress, &cancel).await;
            phase = StrategyPhase::PerTrackComplete;
        }
        debug!("Job {} finished in phase {:?}", job.id, phase);

        let interrupted = cancel.is_cancelled() && results.iter().any(|r| !r.succeeded);
        let outcome = JobOutcome::from_results(results, interrupted, self.settings.policy);

        info!("Job {}: {}", job.id, outcome.summary());
        for failed in &outcome.failed_results {
            warn!(
                "Failed: {} ({})",
                failed.request.label(),
                failed.error_detail.as_deref().unwrap_or("unknown error")
            );
        }

        Ok(outcome)
    }

    async fn attempt_bulk(
        &self,
        job: &DownloadJob,
        hint: &str,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> StrategyPhase {
        info!("Downloading entire album {} (more efficient than per-track)", hint);

        let sink = progress.clone();
        let on_line = move |line: &str| sink.emit(ProgressEvent::BulkOutput(line.to_string()));
        let target = crate::api::invocation_target(hint);

        let result = self
            .downloader
            .invoke(&target, &job.output_directory, &job.format_options, &on_line, cancel)
            .await;

        let mut phase = StrategyPhase::after_bulk(&result);
        // Ctrl-C reaches the child too; it can exit with an error before the token is seen.
        if phase == StrategyPhase::BulkFailedFallingBack && cancel.is_cancelled() {
            phase = StrategyPhase::BulkInterrupted;
        }
        match phase {
            StrategyPhase::BulkSucceeded => info!("Album downloaded successfully"),
            StrategyPhase::BulkInterrupted => warn!("Album download interrupted"),
            _ => {
                let reason = match &result {
                    Ok(outcome) => outcome.failure_detail(),
                    Err(e) => e.to_string(),
                };
                warn!("Album download had issues, falling back to individual tracks: {}", reason);
                progress.emit(ProgressEvent::FallingBack { reason });
            }
        }
        phase
    }

    async fn dispatch_per_track(
        &self,
        job: &DownloadJob,
        progress: &ProgressSink,
        cancel: &CancellationToken,
    ) -> Vec<TaskResult> {
        let queue: RequestQueue = Arc::new(Mutex::new(job.requests.iter().cloned().enumerate().collect()));
        let results = Arc::new(Mutex::new(Vec::with_capacity(job.requests.len())));
        let worker_count = job.concurrency_limit.max(1).min(job.requests.len());

        let ctx = Arc::new(WorkerContext {
            downloader: self.downloader.clone(),
            output_dir: job.output_directory.clone(),
            options: job.format_options,
            settings: self.settings.clone(),
            progress: progress.clone(),
            cancel: cancel.clone(),
            active_downloads: self.active_downloads.clone(),
        });

        debug!("Starting {} download workers", worker_count);
        let workers: Vec<_> = (0..worker_count)
            .map(|worker_id| {
                let ctx = ctx.clone();
                let queue = queue.clone();
                let results = results.clone();
                tokio::spawn(async move { worker_loop(worker_id, ctx, queue, results).await })
            })
            .collect();

        for joined in futures::future::join_all(workers).await {
            if let Err(e) = joined {
                error!("Download worker stopped unexpectedly: {}", e);
            }
        }

        let mut results = std::mem::take(&mut *results.lock().await);

        // Requests nobody finished: never dispatched after cancellation, or lost with a crashed worker.
        let finished: HashSet<usize> = results.iter().map(|r| r.index).collect();
        for (index, request) in job.requests.iter().enumerate() {
            if finished.contains(&index) {
                continue;
            }
            let result = if cancel.is_cancelled() {
                TaskResult::interrupted(index, request.clone(), 0)
            } else {
                TaskResult::failure(index, request.clone(), 0, "download worker stopped unexpectedly")
            };
            results.push(result);
        }

        results
    }
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    queue: RequestQueue,
    results: Arc<Mutex<Vec<TaskResult>>>,
) {
    loop {
        if ctx.cancel.is_cancelled() {
            debug!("Worker {} stopping: job cancelled", worker_id);
            break;
        }

        let next = queue.lock().await.pop_front();
        let Some((index, request)) = next else {
            break;
        };

        let in_flight = {
            let mut active = ctx.active_downloads.lock().await;
            *active += 1;
            *active
        };
        debug!("Worker {} took {} ({} in flight)", worker_id, request.label(), in_flight);
        ctx.progress.emit(ProgressEvent::TrackStarted { index, label: request.label() });

        let result = download_with_retries(&ctx, index, request).await;

        {
            let mut active = ctx.active_downloads.lock().await;
            *active = active.saturating_sub(1);
        }
        ctx.progress.emit(ProgressEvent::TrackFinished { index, succeeded: result.succeeded });
        results.lock().await.push(result);
    }
}

async fn download_with_retries(ctx: &WorkerContext, index: usize, request: Arc<DownloadRequest>) -> TaskResult {
    let max_retries = ctx.settings.max_retries.max(1);
    let target = crate::api::invocation_target(&request.track_id);

    let tracker = std::sync::Mutex::new(TrackProgress::new());
    let sink = &ctx.progress;
    let on_line = |line: &str| {
        let signal = match tracker.lock() {
            Ok(mut tracker) => tracker.observe(line),
            Err(_) => None,
        };
        match signal {
            Some(ProgressSignal::Percent(percent)) => sink.emit(ProgressEvent::TrackProgress { index, percent }),
            Some(ProgressSignal::Tick) => sink.emit(ProgressEvent::TrackTick { index }),
            None => {}
        }
    };

    info!("Starting download: {}", request.label());
    let mut last_error = String::new();

    for attempt in 1..=max_retries {
        let invocation = ctx
            .downloader
            .invoke(&target, &ctx.output_dir, &ctx.options, &on_line, &ctx.cancel)
            .await;

        match invocation {
            Ok(outcome) if outcome.is_success() => {
                info!("Successfully downloaded: {} (attempt {})", request.label(), attempt);
                return TaskResult::success(index, request, attempt);
            }
            Ok(InvocationOutcome::Interrupted) => {
                warn!("Download of {} interrupted", request.label());
                return TaskResult::interrupted(index, request, attempt);
            }
            Ok(outcome) => last_error = outcome.failure_detail(),
            Err(e) => last_error = e.to_string(),
        }

        // A failure that races with cancellation is an interruption, not a download error.
        if ctx.cancel.is_cancelled() {
            warn!("Download of {} interrupted", request.label());
            return TaskResult::interrupted(index, request, attempt);
        }

        warn!(
            "Failed to download {} (attempt {}/{}): {}",
            request.label(),
            attempt,
            max_retries,
            last_error
        );

        if attempt < max_retries {
            sink.emit(ProgressEvent::TrackRetry { index, attempt, error: last_error.clone() });
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    return TaskResult::interrupted(index, request, attempt);
                }
                _ = tokio::time::sleep(ctx.settings.retry_delay) => {}
            }
        }
    }

    error!("Giving up on {} after {} attempts: {}", request.label(), max_retries, last_error);
    TaskResult::failure(index, request, max_retries, last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AudioFormat, Bitrate};
    use crate::downloader::outcome::INTERRUPTED;
    use crate::downloader::LineCallback;
    use crate::errors::AppError;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type Behaviour = Box<dyn Fn(&str, u32, &Path) -> Result<InvocationOutcome> + Send + Sync>;

    /// In-memory stand-in for the external tool.
    struct FakeDownloader {
        behaviour: Behaviour,
        available: bool,
        delay: Duration,
        wait_for_cancel: bool,
        cancel_on: Option<&'static str>,
        calls: std::sync::Mutex<Vec<String>>,
        attempts: std::sync::Mutex<HashMap<String, u32>>,
        availability_checks: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeDownloader {
        fn new(behaviour: impl Fn(&str, u32, &Path) -> Result<InvocationOutcome> + Send + Sync + 'static) -> Self {
            Self {
                behaviour: Box::new(behaviour),
                available: true,
                delay: Duration::ZERO,
                wait_for_cancel: false,
                cancel_on: None,
                calls: std::sync::Mutex::new(Vec::new()),
                attempts: std::sync::Mutex::new(HashMap::new()),
                availability_checks: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn always_ok() -> Self {
            Self::new(|_, _, _| Ok(exit(0, None)))
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Downloader for FakeDownloader {
        async fn check_available(&self) -> Result<()> {
            self.availability_checks.fetch_add(1, Ordering::SeqCst);
            if self.available {
                Ok(())
            } else {
                Err(AppError::DownloaderNotFound("fake".to_string()))
            }
        }

        async fn invoke(
            &self,
            reference: &str,
            output_dir: &Path,
            _options: &FormatOptions,
            on_line: &LineCallback<'_>,
            cancel: &CancellationToken,
        ) -> Result<InvocationOutcome> {
            self.calls.lock().unwrap().push(reference.to_string());
            let previous = {
                let mut attempts = self.attempts.lock().unwrap();
                let count = attempts.entry(reference.to_string()).or_insert(0);
                *count += 1;
                *count - 1
            };

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            on_line("Downloading: 50%");
            if self.cancel_on == Some(reference) {
                cancel.cancel();
            }

            let outcome = if self.wait_for_cancel {
                tokio::select! {
                    _ = cancel.cancelled() => Ok(InvocationOutcome::Interrupted),
                    _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(exit(0, None)),
                }
            } else {
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                (self.behaviour)(reference, previous, output_dir)
            };

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            outcome
        }

        fn get_name(&self) -> &str {
            "fake"
        }
    }

    fn exit(code: i32, tail: Option<&str>) -> InvocationOutcome {
        InvocationOutcome::Exited { code: Some(code), tail: tail.map(str::to_string) }
    }

    fn settings(max_retries: u32) -> ManagerSettings {
        ManagerSettings {
            max_retries,
            retry_delay: Duration::from_millis(1),
            policy: SuccessPolicy::default(),
        }
    }

    fn job(dir: &Path, tracks: usize) -> DownloadJob {
        let requests = (0..tracks)
            .map(|i| DownloadRequest::new(format!("track-{}", i), format!("Track {}", i), "Artist"))
            .collect();
        let options = FormatOptions { format: AudioFormat::Mp3, bitrate: Bitrate::Kbps320 };
        DownloadJob::new(requests, dir, options)
    }

    async fn run(fake: Arc<FakeDownloader>, settings: ManagerSettings, job: DownloadJob) -> Result<JobOutcome> {
        DownloadManager::new(fake, settings)
            .run(job, ProgressSink::disabled(), CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn empty_job_is_a_successful_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::always_ok());

        let outcome = run(fake.clone(), settings(3), job(dir.path(), 0)).await.unwrap();

        assert_eq!(outcome.total, 0);
        assert_eq!(outcome.succeeded_count, 0);
        assert!(outcome.failed_results.is_empty());
        assert!(outcome.is_success());
        assert!(fake.calls().is_empty());
        assert_eq!(fake.availability_checks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn output_directory_failure_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();
        let fake = Arc::new(FakeDownloader::always_ok());

        let err = run(fake.clone(), settings(3), job(&blocker, 3)).await.unwrap_err();

        assert!(matches!(err, AppError::OutputDirectory { .. }));
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn output_directory_is_created_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("Artist - Album").join("disc 1");
        let fake = Arc::new(FakeDownloader::always_ok());

        let outcome = run(fake, settings(3), job(&nested, 2)).await.unwrap();

        assert!(nested.is_dir());
        assert_eq!(outcome.succeeded_count, 2);
    }

    #[tokio::test]
    async fn missing_downloader_is_reported_once_before_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeDownloader::always_ok();
        fake.available = false;
        let fake = Arc::new(fake);

        let err = run(fake.clone(), settings(3), job(dir.path(), 4)).await.unwrap_err();

        assert!(matches!(err, AppError::DownloaderNotFound(_)));
        assert!(err.is_setup_failure());
        assert_eq!(fake.availability_checks.load(Ordering::SeqCst), 1);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn never_exceeds_the_concurrency_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeDownloader::always_ok();
        fake.delay = Duration::from_millis(20);
        let fake = Arc::new(fake);

        let outcome = run(fake.clone(), settings(3), job(dir.path(), 10).with_concurrency(3))
            .await
            .unwrap();

        assert_eq!(outcome.succeeded_count, 10);
        let peak = fake.max_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak concurrency was {}", peak);
        assert!(peak >= 2, "workers never overlapped (peak {})", peak);
        assert_eq!(fake.calls().len(), 10);
    }

    #[tokio::test]
    async fn concurrency_of_one_is_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeDownloader::always_ok();
        fake.delay = Duration::from_millis(5);
        let fake = Arc::new(fake);

        run(fake.clone(), settings(3), job(dir.path(), 4).with_concurrency(1)).await.unwrap();

        assert_eq!(fake.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(fake.calls(), vec!["track-0", "track-1", "track-2", "track-3"]);
    }

    #[tokio::test]
    async fn failed_bulk_falls_back_to_every_track() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::new(|reference, _, _| {
            if reference == "album-ref" {
                Ok(exit(1, Some("album lookup failed")))
            } else {
                Ok(exit(0, None))
            }
        }));

        let job = job(dir.path(), 3).with_bulk_hint(Some("album-ref".to_string()));
        let outcome = run(fake.clone(), settings(3), job).await.unwrap();

        let calls = fake.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], "album-ref");
        let mut individual: Vec<_> = calls[1..].to_vec();
        individual.sort();
        assert_eq!(individual, vec!["track-0", "track-1", "track-2"]);
        assert_eq!(outcome.succeeded_count, 3);
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn bulk_spawn_error_also_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::new(|reference, _, _| {
            if reference == "album-ref" {
                Err(AppError::Subprocess("spawn failed".to_string()))
            } else {
                Ok(exit(0, None))
            }
        }));

        let job = job(dir.path(), 2).with_bulk_hint(Some("album-ref".to_string()));
        let outcome = run(fake.clone(), settings(3), job).await.unwrap();

        assert_eq!(fake.calls().len(), 3);
        assert_eq!(outcome.succeeded_count, 2);
    }

    #[tokio::test]
    async fn successful_bulk_skips_individual_downloads() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::always_ok());

        let job = job(dir.path(), 5).with_bulk_hint(Some("album-ref".to_string()));
        let outcome = run(fake.clone(), settings(3), job).await.unwrap();

        assert_eq!(fake.calls(), vec!["album-ref"]);
        assert_eq!(outcome.total, 5);
        assert_eq!(outcome.succeeded_count, 5);
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn single_track_ignores_bulk_hint() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::always_ok());

        let job = job(dir.path(), 1).with_bulk_hint(Some("album-ref".to_string()));
        run(fake.clone(), settings(3), job).await.unwrap();

        assert_eq!(fake.calls(), vec!["track-0"]);
    }

    #[tokio::test]
    async fn retries_exactly_max_retries_times() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::new(|_, _, _| Ok(exit(1, Some("HTTP Error 429")))));

        let outcome = run(fake.clone(), settings(4), job(dir.path(), 1)).await.unwrap();

        assert_eq!(fake.calls().len(), 4);
        assert_eq!(outcome.succeeded_count, 0);
        let failed = &outcome.failed_results[0];
        assert_eq!(failed.attempts, 4);
        assert_eq!(failed.error_detail.as_deref(), Some("HTTP Error 429"));
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_retry() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::new(|_, previous, _| {
            if previous == 0 {
                Ok(exit(1, Some("connection reset")))
            } else {
                Ok(exit(0, None))
            }
        }));

        let outcome = run(fake.clone(), settings(3), job(dir.path(), 2)).await.unwrap();

        assert_eq!(outcome.succeeded_count, 2);
        assert_eq!(fake.calls().len(), 4);
    }

    #[tokio::test]
    async fn invocation_errors_count_as_failed_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::new(|_, _, _| Err(AppError::Subprocess("broken pipe".to_string()))));

        let outcome = run(fake.clone(), settings(2), job(dir.path(), 1)).await.unwrap();

        assert_eq!(fake.calls().len(), 2);
        let detail = outcome.failed_results[0].error_detail.clone().unwrap();
        assert!(detail.contains("broken pipe"));
    }

    #[tokio::test]
    async fn half_the_tracks_is_still_a_success() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::new(|reference, _, _| {
            if reference == "track-1" || reference == "track-3" {
                Ok(exit(1, Some("not found")))
            } else {
                Ok(exit(0, None))
            }
        }));

        let outcome = run(fake, settings(2), job(dir.path(), 4)).await.unwrap();

        assert_eq!(outcome.succeeded_count, 2);
        assert_eq!(outcome.failed_results.len(), 2);
        assert!(outcome.is_success());
    }

    #[tokio::test]
    async fn a_quarter_of_the_tracks_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::new(|reference, _, _| {
            if reference == "track-0" {
                Ok(exit(0, None))
            } else {
                Ok(exit(1, Some("not found")))
            }
        }));

        let outcome = run(fake, settings(2), job(dir.path(), 4)).await.unwrap();

        assert_eq!(outcome.succeeded_count, 1);
        assert_eq!(outcome.failed_results.len(), 3);
        assert!(!outcome.is_success());
        let report = outcome.to_report();
        assert!(!report.success);
        assert_eq!(report.failures.len(), 3);
    }

    #[tokio::test]
    async fn every_request_yields_exactly_one_result() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::new(|reference, _, _| {
            let n: usize = reference.trim_start_matches("track-").parse().unwrap();
            if n % 3 == 0 {
                Ok(exit(2, None))
            } else {
                Ok(exit(0, None))
            }
        }));

        let outcome = run(fake, settings(2), job(dir.path(), 12).with_concurrency(4)).await.unwrap();

        assert_eq!(outcome.total, 12);
        assert_eq!(outcome.succeeded_count + outcome.failed_results.len(), outcome.total);
        assert_eq!(outcome.failed_results.len(), 4);
        assert!(outcome
            .failed_results
            .iter()
            .all(|r| r.error_detail.as_deref() == Some("exited with status 2")));
    }

    #[tokio::test]
    async fn rerun_against_existing_files_needs_one_attempt_each() {
        let dir = tempfile::tempdir().unwrap();
        // Mimics the tool skipping files that already exist; fresh downloads fail once.
        let fake = Arc::new(FakeDownloader::new(|reference, previous, output_dir| {
            let marker = output_dir.join(format!("{}.mp3", reference));
            if marker.exists() {
                return Ok(exit(0, Some("Skipping (file already exists)")));
            }
            if previous == 0 {
                return Ok(exit(1, Some("timeout")));
            }
            std::fs::write(&marker, b"audio").map_err(AppError::Io)?;
            Ok(exit(0, None))
        }));

        let first = run(fake.clone(), settings(3), job(dir.path(), 3)).await.unwrap();
        assert!(first.is_complete());
        assert_eq!(fake.calls().len(), 6);

        let manager = DownloadManager::new(fake.clone(), settings(3));
        let second = manager
            .run(job(dir.path(), 3), ProgressSink::disabled(), CancellationToken::new())
            .await
            .unwrap();
        assert!(second.is_complete());
        assert_eq!(fake.calls().len(), 9);
    }

    #[tokio::test]
    async fn cancellation_returns_partial_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeDownloader::always_ok();
        fake.wait_for_cancel = true;
        let fake = Arc::new(fake);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let manager = DownloadManager::new(fake.clone(), settings(3));
        let outcome = manager
            .run(job(dir.path(), 5).with_concurrency(2), ProgressSink::disabled(), cancel)
            .await
            .unwrap();

        assert!(outcome.interrupted);
        assert!(!outcome.is_success());
        assert_eq!(outcome.total, 5);
        assert_eq!(outcome.failed_results.len(), 5);
        assert!(outcome
            .failed_results
            .iter()
            .all(|r| r.error_detail.as_deref() == Some(INTERRUPTED)));
        // only the two in-flight tracks were ever started
        assert_eq!(fake.calls().len(), 2);
        let never_started = outcome.failed_results.iter().filter(|r| r.attempts == 0).count();
        assert_eq!(never_started, 3);
        assert_eq!(manager.active_downloads().await, 0);
    }

    #[tokio::test]
    async fn tool_dying_from_ctrl_c_counts_as_interrupted() {
        let dir = tempfile::tempdir().unwrap();
        // the tool sees SIGINT first and exits before the token is observed
        let mut fake = FakeDownloader::new(|reference, _, _| {
            if reference == "track-1" {
                Ok(InvocationOutcome::Exited { code: None, tail: Some("KeyboardInterrupt".to_string()) })
            } else {
                Ok(exit(0, None))
            }
        });
        fake.cancel_on = Some("track-1");
        let fake = Arc::new(fake);

        let cancel = CancellationToken::new();
        let outcome = DownloadManager::new(fake.clone(), settings(1))
            .run(job(dir.path(), 3).with_concurrency(1), ProgressSink::disabled(), cancel)
            .await
            .unwrap();

        assert!(outcome.interrupted);
        assert!(!outcome.is_success());
        assert_eq!(outcome.succeeded_count, 1);
        assert_eq!(fake.calls(), vec!["track-0", "track-1"]);
        let interrupted_track = outcome.failed_results.iter().find(|r| r.index == 1).unwrap();
        assert_eq!(interrupted_track.error_detail.as_deref(), Some(INTERRUPTED));
        assert_eq!(interrupted_track.attempts, 1);
        assert!(outcome
            .failed_results
            .iter()
            .all(|r| r.error_detail.as_deref() == Some(INTERRUPTED)));
    }

    #[tokio::test]
    async fn bulk_failure_during_cancellation_does_not_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeDownloader::new(|_, _, _| Ok(exit(130, Some("KeyboardInterrupt"))));
        fake.cancel_on = Some("album-ref");
        let fake = Arc::new(fake);

        let job = job(dir.path(), 3).with_bulk_hint(Some("album-ref".to_string()));
        let outcome = DownloadManager::new(fake.clone(), settings(3))
            .run(job, ProgressSink::disabled(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fake.calls(), vec!["album-ref"]);
        assert!(outcome.interrupted);
        assert_eq!(outcome.failed_results.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_wait_the_configured_delay_between_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::new(|_, _, _| Ok(exit(1, Some("HTTP 429")))));
        let settings = ManagerSettings {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            policy: SuccessPolicy::default(),
        };

        let started = tokio::time::Instant::now();
        let outcome = run(fake.clone(), settings, job(dir.path(), 1)).await.unwrap();

        // two gaps between three attempts, none after the last one
        assert_eq!(started.elapsed(), Duration::from_secs(4));
        assert_eq!(fake.calls().len(), 3);
        assert_eq!(outcome.failed_results[0].attempts, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn recovered_track_waits_once() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::new(|_, previous, _| {
            if previous == 0 {
                Ok(exit(1, Some("timeout")))
            } else {
                Ok(exit(0, None))
            }
        }));
        let settings = ManagerSettings {
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            policy: SuccessPolicy::default(),
        };

        let started = tokio::time::Instant::now();
        let outcome = run(fake, settings, job(dir.path(), 1)).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(2));
        assert!(outcome.is_complete());
    }

    #[tokio::test]
    async fn cancelled_bulk_does_not_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeDownloader::always_ok();
        fake.wait_for_cancel = true;
        let fake = Arc::new(fake);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let job = job(dir.path(), 3).with_bulk_hint(Some("album-ref".to_string()));
        let outcome = DownloadManager::new(fake.clone(), settings(3))
            .run(job, ProgressSink::disabled(), cancel)
            .await
            .unwrap();

        assert_eq!(fake.calls(), vec!["album-ref"]);
        assert!(outcome.interrupted);
        assert_eq!(outcome.failed_results.len(), 3);
    }

    #[tokio::test]
    async fn progress_events_bracket_each_track() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeDownloader::always_ok());
        let (sink, mut rx) = ProgressSink::channel();

        DownloadManager::new(fake, settings(3))
            .run(job(dir.path(), 2), sink, CancellationToken::new())
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }

        assert_eq!(events[0], ProgressEvent::JobStarted { total: 2, strategy: Strategy::PerTrack });
        for index in 0..2 {
            assert!(events.contains(&ProgressEvent::TrackProgress { index, percent: 50.0 }));
            assert!(events.contains(&ProgressEvent::TrackFinished { index, succeeded: true }));
        }
    }
}

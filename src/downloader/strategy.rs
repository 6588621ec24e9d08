//! Two-phase download strategy: one bulk attempt against the album, then an
//! unconditional per-track pass over every request if the bulk run failed.

use super::{DownloadJob, InvocationOutcome};

/// How a job will be attempted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    BulkThenPerTrack,
    PerTrack,
}

impl Strategy {
    /// Bulk only pays off with an album reference and more than one track.
    pub fn for_job(job: &DownloadJob) -> Self {
        if job.album_bulk_hint.is_some() && job.requests.len() > 1 {
            Strategy::BulkThenPerTrack
        } else {
            Strategy::PerTrack
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyPhase {
    NotAttempted,
    BulkSucceeded,
    BulkFailedFallingBack,
    BulkInterrupted,
    PerTrackComplete,
}

impl StrategyPhase {
    /// Transition after the bulk invocation. A spawn error counts as a failed bulk run.
    pub fn after_bulk<E>(result: &Result<InvocationOutcome, E>) -> Self {
        match result {
            Ok(InvocationOutcome::Interrupted) => StrategyPhase::BulkInterrupted,
            Ok(outcome) if outcome.is_success() => StrategyPhase::BulkSucceeded,
            _ => StrategyPhase::BulkFailedFallingBack,
        }
    }

    pub fn needs_per_track(&self) -> bool {
        matches!(self, StrategyPhase::NotAttempted | StrategyPhase::BulkFailedFallingBack)
    }
}

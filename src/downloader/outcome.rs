//! Per-track results and the aggregate pass/fail decision for a job.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::DownloadRequest;

/// Immutable outcome of one track's attempt sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    /// Position of the request in the job, used to detect tracks without a result.
    pub index: usize,
    pub request: Arc<DownloadRequest>,
    pub succeeded: bool,
    pub error_detail: Option<String>,
    /// Number of invocations made; 0 when the track was never dispatched.
    pub attempts: u32,
}

impl TaskResult {
    pub fn success(index: usize, request: Arc<DownloadRequest>, attempts: u32) -> Self {
        Self {
            index,
            request,
            succeeded: true,
            error_detail: None,
            attempts,
        }
    }

    pub fn failure(index: usize, request: Arc<DownloadRequest>, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            index,
            request,
            succeeded: false,
            error_detail: Some(error.into()),
            attempts,
        }
    }

    pub fn interrupted(index: usize, request: Arc<DownloadRequest>, attempts: u32) -> Self {
        Self::failure(index, request, attempts, INTERRUPTED)
    }
}

pub const INTERRUPTED: &str = "interrupted";

/// Partial-success threshold: a job where some tracks failed still counts as
/// a success when at least `min_success_ratio` of them made it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuccessPolicy {
    pub min_success_ratio: f64,
}

impl Default for SuccessPolicy {
    fn default() -> Self {
        Self { min_success_ratio: 0.5 }
    }
}

impl SuccessPolicy {
    pub fn new(min_success_ratio: f64) -> Self {
        Self {
            min_success_ratio: min_success_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn is_success(&self, succeeded: usize, total: usize) -> bool {
        if total == 0 || succeeded == total {
            return true;
        }
        if succeeded == 0 {
            return false;
        }
        succeeded as f64 >= total as f64 * self.min_success_ratio
    }
}

/// Aggregate result of one orchestration run.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub total: usize,
    pub succeeded_count: usize,
    /// Failed tracks in completion order.
    pub failed_results: Vec<TaskResult>,
    /// Set when the run was cancelled before every track finished.
    pub interrupted: bool,
    pub policy: SuccessPolicy,
}

impl JobOutcome {
    pub fn empty(policy: SuccessPolicy) -> Self {
        Self {
            total: 0,
            succeeded_count: 0,
            failed_results: Vec::new(),
            interrupted: false,
            policy,
        }
    }

    pub fn from_results(results: Vec<TaskResult>, interrupted: bool, policy: SuccessPolicy) -> Self {
        let total = results.len();
        let (succeeded, failed): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.succeeded);
        Self {
            total,
            succeeded_count: succeeded.len(),
            failed_results: failed,
            interrupted,
            policy,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.succeeded_count == self.total
    }

    /// Overall pass/fail. An interrupted job only passes if nothing was lost.
    pub fn is_success(&self) -> bool {
        if self.interrupted {
            return self.is_complete();
        }
        self.policy.is_success(self.succeeded_count, self.total)
    }

    pub fn summary(&self) -> String {
        format!("Downloaded {} of {} tracks", self.succeeded_count, self.total)
    }

    pub fn to_report(&self) -> DownloadReport {
        DownloadReport {
            success: self.is_success(),
            succeeded: self.succeeded_count,
            total: self.total,
            interrupted: self.interrupted,
            failures: self
                .failed_results
                .iter()
                .map(|r| FailureReport {
                    name: r.request.label(),
                    error: r.error_detail.clone().unwrap_or_default(),
                })
                .collect(),
        }
    }
}

/// What the caller gets back from `run_download_job`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadReport {
    pub success: bool,
    pub succeeded: usize,
    pub total: usize,
    pub interrupted: bool,
    pub failures: Vec<FailureReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub name: String,
    pub error: String,
}

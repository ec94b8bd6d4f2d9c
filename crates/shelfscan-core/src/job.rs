use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{UpsertKind, UpsertOutcome};
use crate::rate_limiter::RateLimitConfig;

/// Status of one job within a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(format!("Unknown job status: {}", s)),
        }
    }
}

/// One locator's trip through the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Position in the submitted list.
    pub index: usize,
    pub locator: String,
    pub status: JobStatus,
    pub platform: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    /// Record written by a successful job.
    pub product_id: Option<Uuid>,
}

impl Job {
    fn new(index: usize, locator: String, now: DateTime<Utc>) -> Self {
        Self {
            index,
            locator,
            status: JobStatus::Pending,
            platform: None,
            enqueued_at: now,
            started_at: None,
            finished_at: None,
            error: None,
            product_id: None,
        }
    }
}

/// Terminal report of a batch run.
///
/// `succeeded + failed + skipped == total` always holds; `skipped` counts
/// jobs a cancellation kept from ever running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub label: Option<String>,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
    /// Successful jobs that inserted a new record.
    pub created: usize,
    /// Successful jobs that updated an existing record.
    pub updated: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// State of one batch run, owned by the orchestrator's control loop.
///
/// Transition methods return `false` and leave the run untouched when the
/// transition is not allowed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRun {
    pub id: Uuid,
    pub label: Option<String>,
    pub jobs: Vec<Job>,
    pub cancelled: bool,
    pub completed_count: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub created: usize,
    pub updated: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchRun {
    pub fn new(locators: Vec<String>, label: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            label,
            jobs: locators
                .into_iter()
                .enumerate()
                .map(|(index, locator)| Job::new(index, locator, now))
                .collect(),
            cancelled: false,
            completed_count: 0,
            succeeded: 0,
            failed: 0,
            created: 0,
            updated: 0,
            started_at: now,
            finished_at: None,
        }
    }

    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn running_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == JobStatus::Running)
            .count()
    }

    /// Pending -> Running. Refused once the run is cancelled.
    pub fn mark_running(&mut self, index: usize, platform: &str) -> bool {
        if self.cancelled || self.is_finished() {
            return false;
        }
        match self.jobs.get_mut(index) {
            Some(job) if job.status == JobStatus::Pending => {
                job.status = JobStatus::Running;
                job.platform = Some(platform.to_string());
                job.started_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Running -> Succeeded.
    pub fn mark_succeeded(&mut self, index: usize, outcome: &UpsertOutcome) -> bool {
        let Some(job) = self.running_job(index) else {
            return false;
        };
        job.status = JobStatus::Succeeded;
        job.finished_at = Some(Utc::now());
        job.product_id = Some(outcome.id);
        self.succeeded += 1;
        match outcome.kind {
            UpsertKind::Created => self.created += 1,
            UpsertKind::Updated => self.updated += 1,
        }
        self.completed_count += 1;
        true
    }

    /// Running -> Failed.
    pub fn mark_failed(&mut self, index: usize, error: impl Into<String>) -> bool {
        let Some(job) = self.running_job(index) else {
            return false;
        };
        job.status = JobStatus::Failed;
        job.finished_at = Some(Utc::now());
        job.error = Some(error.into());
        self.failed += 1;
        self.completed_count += 1;
        true
    }

    /// Stop further dispatch. Jobs already running still complete.
    pub fn mark_cancelled(&mut self) {
        if !self.is_finished() {
            self.cancelled = true;
        }
    }

    /// Close the run. Refused while a job is still running.
    pub fn finish(&mut self) -> bool {
        if self.is_finished() || self.running_count() > 0 {
            return false;
        }
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            run_id: self.id,
            label: self.label.clone(),
            total: self.total(),
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.total() - self.completed_count,
            cancelled: self.cancelled,
            created: self.created,
            updated: self.updated,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    fn running_job(&mut self, index: usize) -> Option<&mut Job> {
        self.jobs
            .get_mut(index)
            .filter(|job| job.status == JobStatus::Running)
    }
}

/// Per-submission settings.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Overrides the orchestrator's default delay for this run.
    pub rate_limit: Option<RateLimitConfig>,
    pub label: Option<String>,
    /// Token to cancel the run with; a fresh one is created when absent.
    pub cancel: Option<CancellationToken>,
}

impl SubmitOptions {
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(n: usize) -> BatchRun {
        BatchRun::new(
            (0..n).map(|i| format!("https://shop.example.com/p/{i}")).collect(),
            None,
        )
    }

    fn created() -> UpsertOutcome {
        UpsertOutcome::created(Uuid::new_v4())
    }

    #[test]
    fn test_job_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            let s = status.as_str();
            let parsed: JobStatus = s.parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_transitions_update_counters() {
        let mut run = run(3);
        assert!(run.mark_running(0, "generic"));
        assert!(run.mark_succeeded(0, &created()));
        assert!(run.mark_running(1, "generic"));
        assert!(run.mark_failed(1, "boom"));

        assert_eq!(run.completed_count, 2);
        assert_eq!(run.succeeded, 1);
        assert_eq!(run.failed, 1);
        assert_eq!(run.created, 1);
        assert_eq!(run.jobs[1].error.as_deref(), Some("boom"));
        assert_eq!(run.jobs[0].platform.as_deref(), Some("generic"));
    }

    #[test]
    fn test_invalid_transitions_are_refused() {
        let mut run = run(2);
        assert!(!run.mark_succeeded(0, &created()));
        assert!(!run.mark_failed(5, "nope"));
        assert!(run.mark_running(0, "generic"));
        assert!(!run.mark_running(0, "generic"));
        assert!(run.mark_failed(0, "x"));
        assert!(!run.mark_failed(0, "again"));
        assert_eq!(run.completed_count, 1);
    }

    #[test]
    fn test_cancelled_run_refuses_new_running_jobs() {
        let mut run = run(3);
        assert!(run.mark_running(0, "generic"));
        run.mark_cancelled();
        assert!(!run.mark_running(1, "generic"));
        assert!(run.mark_succeeded(0, &created()));
        assert!(run.finish());

        let summary = run.summary();
        assert!(summary.cancelled);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.succeeded + summary.failed + summary.skipped, summary.total);
    }

    #[test]
    fn test_finish_waits_for_running_jobs() {
        let mut run = run(1);
        assert!(run.mark_running(0, "generic"));
        assert!(!run.finish());
        assert!(run.mark_failed(0, "x"));
        assert!(run.finish());
        assert!(!run.finish());
        assert!(!run.mark_running(0, "generic"));
    }
}

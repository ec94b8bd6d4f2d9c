//! Orchestrator events and the sinks that receive them.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::job::BatchSummary;

/// Events emitted by the orchestrator while a batch runs.
///
/// For a run of N jobs that all get dispatched, a sink sees exactly one
/// `Started`, N `Progress` events and one `Finished`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Started {
        run_id: Uuid,
        total: usize,
        label: Option<String>,
    },
    JobStarted {
        run_id: Uuid,
        index: usize,
        locator: String,
        platform: String,
    },
    JobFailed {
        run_id: Uuid,
        index: usize,
        locator: String,
        error: String,
    },
    /// Sent after every finished job, success or failure.
    Progress {
        run_id: Uuid,
        current: usize,
        total: usize,
        /// The locator of the job that just finished.
        label: String,
    },
    Finished {
        summary: BatchSummary,
    },
}

impl BatchEvent {
    pub fn run_id(&self) -> Uuid {
        match self {
            BatchEvent::Started { run_id, .. }
            | BatchEvent::JobStarted { run_id, .. }
            | BatchEvent::JobFailed { run_id, .. }
            | BatchEvent::Progress { run_id, .. } => *run_id,
            BatchEvent::Finished { summary } => summary.run_id,
        }
    }
}

/// Receives orchestrator events.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &BatchEvent) {
        let _ = event;
    }
}

/// Sink that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {}

/// Sink that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn report(&self, event: &BatchEvent) {
        match event {
            BatchEvent::Started {
                run_id,
                total,
                label,
            } => {
                tracing::info!(%run_id, %total, ?label, "Batch started");
            }
            BatchEvent::JobStarted {
                run_id,
                index,
                locator,
                platform,
            } => {
                tracing::debug!(%run_id, job_index = %index, %locator, %platform, "Job started");
            }
            BatchEvent::JobFailed {
                run_id,
                index,
                locator,
                error,
            } => {
                tracing::debug!(%run_id, job_index = %index, %locator, %error, "Job failed");
            }
            BatchEvent::Progress {
                run_id,
                current,
                total,
                label,
            } => {
                tracing::info!(%run_id, %current, %total, locator = %label, "Progress");
            }
            BatchEvent::Finished { summary } => {
                tracing::info!(
                    run_id = %summary.run_id,
                    total = summary.total,
                    succeeded = summary.succeeded,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    cancelled = summary.cancelled,
                    "Batch finished"
                );
            }
        }
    }
}

/// Forwards events to any number of broadcast subscribers.
///
/// Slow subscribers lag and lose old events rather than blocking the run.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    tx: broadcast::Sender<BatchEvent>,
}

impl ChannelProgressSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.tx.subscribe()
    }
}

impl ProgressSink for ChannelProgressSink {
    fn report(&self, event: &BatchEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event.clone());
    }
}

/// Fans one event out to several sinks in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn ProgressSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl ProgressSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl ProgressSink for FanoutSink {
    fn report(&self, event: &BatchEvent) {
        for sink in &self.sinks {
            sink.report(event);
        }
    }
}

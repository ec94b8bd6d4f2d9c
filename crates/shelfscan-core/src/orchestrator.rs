//! Batch orchestrator: drives a submitted list of locators through the
//! page lifecycle and into the product store.
//!
//! Each submission becomes a [`BatchRun`] owned by one controller task.
//! The controller is the only writer of run state; everyone else sees
//! clones published through a `watch` channel. Jobs are dispatched in
//! submission order, at most `workers` at a time, and a failing job is
//! counted and logged without stopping the run.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::OrchestratorConfig;
use crate::dispatch::CapabilityRegistry;
use crate::error::AppError;
use crate::job::{BatchRun, BatchSummary, SubmitOptions};
use crate::lifecycle::PageLifecycle;
use crate::locator;
use crate::models::UpsertOutcome;
use crate::progress::{BatchEvent, ProgressSink};
use crate::rate_limiter::RateLimiter;
use crate::traits::{ContextProvider, ExtractionCapability, NullArchive, ProductStore, RunArchive};

/// Caller's view of a submitted run.
#[derive(Debug, Clone)]
pub struct BatchRunHandle {
    id: Uuid,
    cancel: CancellationToken,
    snapshots: watch::Receiver<BatchRun>,
}

impl BatchRunHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop dispatching new jobs. Jobs already running finish normally.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Latest published state of the run.
    pub fn snapshot(&self) -> BatchRun {
        self.snapshots.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.snapshots.borrow().is_finished()
    }

    /// A receiver that is notified after every state change.
    pub fn subscribe(&self) -> watch::Receiver<BatchRun> {
        self.snapshots.clone()
    }

    /// Wait for the run to finish and return its summary.
    pub async fn wait(&self) -> BatchSummary {
        let mut rx = self.snapshots.clone();
        let finished = rx
            .wait_for(BatchRun::is_finished)
            .await
            .map(|run| run.summary());
        // The controller only goes away early if it panicked.
        finished.unwrap_or_else(|_| rx.borrow().summary())
    }
}

/// Drives batch runs for one provider/store pair.
///
/// One run is live at a time; a second submission while a run is active
/// is rejected with [`AppError::BatchAlreadyRunning`].
#[derive(Clone)]
pub struct Orchestrator<P, S, A = NullArchive> {
    lifecycle: PageLifecycle<P>,
    registry: Arc<CapabilityRegistry>,
    store: S,
    archive: A,
    config: OrchestratorConfig,
    active: Arc<Mutex<Option<Uuid>>>,
}

impl<P, S> Orchestrator<P, S, NullArchive>
where
    P: ContextProvider,
    S: ProductStore,
{
    pub fn new(
        provider: P,
        registry: Arc<CapabilityRegistry>,
        store: S,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            lifecycle: PageLifecycle::new(provider, config.lifecycle),
            registry,
            store,
            archive: NullArchive,
            config,
            active: Arc::new(Mutex::new(None)),
        }
    }
}

impl<P, S, A> Orchestrator<P, S, A>
where
    P: ContextProvider,
    S: ProductStore,
    A: RunArchive,
{
    /// Archive finished runs in `archive`.
    pub fn with_archive<A2: RunArchive>(self, archive: A2) -> Orchestrator<P, S, A2> {
        Orchestrator {
            lifecycle: self.lifecycle,
            registry: self.registry,
            store: self.store,
            archive,
            config: self.config,
            active: self.active,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn archive(&self) -> &A {
        &self.archive
    }

    /// Id of the live run, if any.
    pub fn active_run(&self) -> Option<Uuid> {
        *lock_active(&self.active)
    }

    /// Validate `locators`, start a run in the background, and return its
    /// handle. Duplicates are kept and run as separate jobs.
    pub fn submit_batch(
        &self,
        locators: Vec<String>,
        options: SubmitOptions,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<BatchRunHandle, AppError> {
        if locators.is_empty() {
            return Err(AppError::InvalidBatch("no locators submitted".into()));
        }
        let locators = locators
            .into_iter()
            .map(|raw| {
                let trimmed = raw.trim().to_string();
                locator::parse(&trimmed).map(|_| trimmed)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let run = BatchRun::new(locators, options.label);
        let guard = {
            let mut active = lock_active(&self.active);
            if let Some(running) = *active {
                return Err(AppError::BatchAlreadyRunning(running));
            }
            *active = Some(run.id);
            ActiveGuard {
                active: Arc::clone(&self.active),
                run_id: run.id,
            }
        };

        let cancel = options.cancel.unwrap_or_default();
        let (tx, rx) = watch::channel(run.clone());
        let handle = BatchRunHandle {
            id: run.id,
            cancel: cancel.clone(),
            snapshots: rx,
        };

        let controller = Controller {
            lifecycle: self.lifecycle.clone(),
            registry: Arc::clone(&self.registry),
            store: self.store.clone(),
            archive: self.archive.clone(),
            workers: self.config.workers.max(1),
            limiter: RateLimiter::new(options.rate_limit.unwrap_or(self.config.rate_limit)),
            cancel,
            sink,
            tx,
            run,
        };
        tokio::spawn(controller.run(guard));

        Ok(handle)
    }

    /// Submit and wait for the summary.
    pub async fn run_batch(
        &self,
        locators: Vec<String>,
        options: SubmitOptions,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<BatchSummary, AppError> {
        let handle = self.submit_batch(locators, options, sink)?;
        Ok(handle.wait().await)
    }
}

fn lock_active(active: &Mutex<Option<Uuid>>) -> MutexGuard<'_, Option<Uuid>> {
    active.lock().unwrap_or_else(|e| e.into_inner())
}

/// Clears the active-run flag when the run ends, even by panic.
struct ActiveGuard {
    active: Arc<Mutex<Option<Uuid>>>,
    run_id: Uuid,
}

impl ActiveGuard {
    fn release(&self) {
        let mut active = lock_active(&self.active);
        if *active == Some(self.run_id) {
            *active = None;
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.release();
    }
}

type JobFuture = Pin<Box<dyn Future<Output = (usize, Result<Result<UpsertOutcome, AppError>, JoinError>)> + Send>>;

/// Owns one run's state for its whole lifetime.
struct Controller<P, S, A> {
    lifecycle: PageLifecycle<P>,
    registry: Arc<CapabilityRegistry>,
    store: S,
    archive: A,
    workers: usize,
    limiter: RateLimiter,
    cancel: CancellationToken,
    sink: Arc<dyn ProgressSink>,
    tx: watch::Sender<BatchRun>,
    run: BatchRun,
}

impl<P, S, A> Controller<P, S, A>
where
    P: ContextProvider,
    S: ProductStore,
    A: RunArchive,
{
    async fn run(mut self, guard: ActiveGuard) -> BatchSummary {
        let run_id = self.run.id;
        let total = self.run.total();
        self.sink.report(&BatchEvent::Started {
            run_id,
            total,
            label: self.run.label.clone(),
        });

        let mut queue: VecDeque<usize> = (0..total).collect();
        let mut in_flight: FuturesUnordered<JobFuture> = FuturesUnordered::new();

        loop {
            if self.cancel.is_cancelled() && !self.run.cancelled {
                tracing::info!(%run_id, pending = queue.len(), "Cancellation requested, no further dispatch");
                self.run.mark_cancelled();
                self.publish();
            }

            let can_dispatch =
                !self.run.cancelled && !queue.is_empty() && in_flight.len() < self.workers;
            if !can_dispatch && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;

                Some((index, joined)) = in_flight.next(), if !in_flight.is_empty() => {
                    self.complete(index, joined).await;
                }
                () = self.cancel.cancelled(), if !self.run.cancelled => {}
                () = self.limiter.acquire(), if can_dispatch => {
                    if self.cancel.is_cancelled() {
                        continue;
                    }
                    if let Some(index) = queue.pop_front() {
                        in_flight.push(self.dispatch(index));
                    }
                }
            }
        }

        self.run.finish();
        if let Err(e) = self.archive.archive(&self.run).await {
            tracing::error!(%run_id, error = %e, "Failed to archive batch run");
        }
        guard.release();

        let summary = self.run.summary();
        self.sink.report(&BatchEvent::Finished {
            summary: summary.clone(),
        });
        self.publish();
        summary
    }

    fn dispatch(&mut self, index: usize) -> JobFuture {
        let locator = self.run.jobs[index].locator.clone();
        let resolution = self.registry.resolve(&locator);
        self.run.mark_running(index, &resolution.platform);
        self.sink.report(&BatchEvent::JobStarted {
            run_id: self.run.id,
            index,
            locator: locator.clone(),
            platform: resolution.platform.clone(),
        });
        self.publish();

        let task = tokio::spawn(execute_job(
            self.lifecycle.clone(),
            self.store.clone(),
            locator,
            resolution.platform,
            resolution.capability,
        ));
        Box::pin(async move { (index, task.await) })
    }

    async fn complete(&mut self, index: usize, joined: Result<Result<UpsertOutcome, AppError>, JoinError>) {
        let run_id = self.run.id;
        let locator = self.run.jobs[index].locator.clone();
        let outcome = joined.unwrap_or_else(|e| Err(AppError::Generic(format!("job task failed: {e}"))));

        match outcome {
            Ok(outcome) => {
                tracing::debug!(%run_id, job_index = index, %locator, product_id = %outcome.id, kind = ?outcome.kind, "Job succeeded");
                self.run.mark_succeeded(index, &outcome);
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(%run_id, job_index = index, %locator, %error, "Job failed");
                self.sink.report(&BatchEvent::JobFailed {
                    run_id,
                    index,
                    locator: locator.clone(),
                    error: error.clone(),
                });
                self.run.mark_failed(index, error);
            }
        }

        if self.workers == 1 {
            self.limiter.record_completion().await;
        }

        self.sink.report(&BatchEvent::Progress {
            run_id,
            current: self.run.completed_count,
            total: self.run.total(),
            label: locator,
        });
        self.publish();
    }

    fn publish(&self) {
        self.tx.send_replace(self.run.clone());
    }
}

/// Load, extract and store one locator.
async fn execute_job<P: ContextProvider, S: ProductStore>(
    lifecycle: PageLifecycle<P>,
    store: S,
    locator: String,
    platform: String,
    capability: Arc<dyn ExtractionCapability>,
) -> Result<UpsertOutcome, AppError> {
    let result = lifecycle.run_job(&locator, &platform, capability).await?;
    store
        .upsert(&result)
        .await
        .map_err(AppError::into_store_write)
}

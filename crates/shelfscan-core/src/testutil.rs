//! Test utilities: mock implementations of the core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::BatchSummary;
use crate::models::{
    ChangeHistoryEntry, ExtractionResult, ProductFields, ProductRecord, StockStatus, UpsertOutcome,
};
use crate::progress::{BatchEvent, ProgressSink};
use crate::query::ProductQuery;
use crate::traits::{ContextProvider, ExtractionCapability, PageSnapshot, ProductStore};

// ---------------------------------------------------------------------------
// MockContextProvider
// ---------------------------------------------------------------------------

/// How a mocked page behaves. Pages without an entry load normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageBehaviour {
    OpenFails,
    /// `open` succeeds only after the given delay.
    SlowOpen(Duration),
    /// `wait_until_ready` never resolves.
    NeverReady,
    /// Readiness arrives after the given delay.
    Delay(Duration),
    SnapshotFails,
    SnapshotHangs,
    CloseFails,
}

#[derive(Debug, Default)]
struct Concurrency {
    live: usize,
    max: usize,
}

/// Context provider with scripted per-locator behaviour.
#[derive(Clone, Default)]
pub struct MockContextProvider {
    behaviours: Arc<Mutex<HashMap<String, PageBehaviour>>>,
    opened: Arc<Mutex<Vec<String>>>,
    closed: Arc<Mutex<Vec<String>>>,
    concurrency: Arc<Mutex<Concurrency>>,
}

/// Handle to a mocked context.
#[derive(Debug)]
pub struct MockHandle {
    pub locator: String,
}

impl MockContextProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behaviour(self, locator: &str, behaviour: PageBehaviour) -> Self {
        self.behaviours
            .lock()
            .unwrap()
            .insert(locator.to_string(), behaviour);
        self
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    pub fn closed(&self) -> Vec<String> {
        self.closed.lock().unwrap().clone()
    }

    /// Contexts opened and not yet closed.
    pub fn live(&self) -> usize {
        self.concurrency.lock().unwrap().live
    }

    /// Highest number of contexts open at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.concurrency.lock().unwrap().max
    }

    fn behaviour(&self, locator: &str) -> Option<PageBehaviour> {
        self.behaviours.lock().unwrap().get(locator).copied()
    }
}

impl ContextProvider for MockContextProvider {
    type Handle = MockHandle;

    async fn open(&self, locator: &str) -> Result<MockHandle, AppError> {
        match self.behaviour(locator) {
            Some(PageBehaviour::OpenFails) => {
                return Err(AppError::ContextOpen {
                    locator: locator.to_string(),
                    message: "tab limit reached".into(),
                });
            }
            Some(PageBehaviour::SlowOpen(delay)) => tokio::time::sleep(delay).await,
            _ => {}
        }
        self.opened.lock().unwrap().push(locator.to_string());
        let mut c = self.concurrency.lock().unwrap();
        c.live += 1;
        c.max = c.max.max(c.live);
        Ok(MockHandle {
            locator: locator.to_string(),
        })
    }

    async fn wait_until_ready(&self, handle: &MockHandle, _timeout: Duration) -> Result<(), AppError> {
        match self.behaviour(&handle.locator) {
            Some(PageBehaviour::NeverReady) => std::future::pending().await,
            Some(PageBehaviour::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn snapshot(&self, handle: &MockHandle) -> Result<PageSnapshot, AppError> {
        match self.behaviour(&handle.locator) {
            Some(PageBehaviour::SnapshotFails) => {
                Err(AppError::Generic("target closed".into()))
            }
            Some(PageBehaviour::SnapshotHangs) => std::future::pending().await,
            _ => Ok(PageSnapshot {
                locator: handle.locator.clone(),
                final_url: handle.locator.clone(),
                html: format!("<html><head><title>{}</title></head></html>", handle.locator),
            }),
        }
    }

    async fn close(&self, handle: MockHandle) -> Result<(), AppError> {
        self.closed.lock().unwrap().push(handle.locator.clone());
        self.concurrency.lock().unwrap().live -= 1;
        if self.behaviour(&handle.locator) == Some(PageBehaviour::CloseFails) {
            return Err(AppError::Generic("context already gone".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockCapability
// ---------------------------------------------------------------------------

/// Capability that names every product after its locator.
#[derive(Clone, Default)]
pub struct MockCapability {
    failing: Arc<Mutex<HashSet<String>>>,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl MockCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail extraction for `locator`.
    pub fn failing_on(self, locator: &str) -> Self {
        self.failing.lock().unwrap().insert(locator.to_string());
        self
    }
}

impl ExtractionCapability for MockCapability {
    fn name(&self) -> &str {
        "mock"
    }

    fn extract(&self, page: &PageSnapshot) -> Result<ProductFields, AppError> {
        self.calls.lock().unwrap().push(page.locator.clone());
        if self.failing.lock().unwrap().contains(&page.locator) {
            return Err(AppError::Extraction("no product name found".into()));
        }
        Ok(ProductFields {
            name: page.locator.clone(),
            price: Some(10.0),
            stock: StockStatus::InStock,
            ..Default::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Sink that records every event.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<BatchEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BatchEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn progress_currents(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BatchEvent::Progress { current, .. } => Some(current),
                _ => None,
            })
            .collect()
    }

    pub fn progress_totals(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BatchEvent::Progress { total, .. } => Some(total),
                _ => None,
            })
            .collect()
    }

    pub fn started_indices(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BatchEvent::JobStarted { index, .. } => Some(index),
                _ => None,
            })
            .collect()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BatchEvent::JobFailed { index, .. } => Some(index),
                _ => None,
            })
            .collect()
    }

    pub fn summaries(&self) -> Vec<BatchSummary> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                BatchEvent::Finished { summary } => Some(summary),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for RecordingSink {
    fn report(&self, event: &BatchEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Records events and cancels `token` once `after` jobs have finished.
#[derive(Clone)]
pub struct CancelAfter {
    after: usize,
    token: CancellationToken,
    recorder: RecordingSink,
}

impl CancelAfter {
    pub fn new(after: usize, token: CancellationToken) -> Self {
        Self {
            after,
            token,
            recorder: RecordingSink::new(),
        }
    }

    pub fn recorder(&self) -> &RecordingSink {
        &self.recorder
    }
}

impl ProgressSink for CancelAfter {
    fn report(&self, event: &BatchEvent) {
        self.recorder.report(event);
        if let BatchEvent::Progress { current, .. } = event
            && *current >= self.after
        {
            self.token.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// FailingStore
// ---------------------------------------------------------------------------

/// Store whose writes always fail.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingStore;

impl ProductStore for FailingStore {
    async fn upsert(&self, _result: &ExtractionResult) -> Result<UpsertOutcome, AppError> {
        Err(AppError::DatabaseError("connection refused".into()))
    }

    async fn get(&self, _id: Uuid) -> Result<Option<ProductRecord>, AppError> {
        Ok(None)
    }

    async fn get_by_locator(&self, _locator: &str) -> Result<Option<ProductRecord>, AppError> {
        Ok(None)
    }

    async fn query(&self, _query: &ProductQuery) -> Result<Vec<ProductRecord>, AppError> {
        Ok(vec![])
    }

    async fn history(
        &self,
        _product_id: Uuid,
        _limit: usize,
    ) -> Result<Vec<ChangeHistoryEntry>, AppError> {
        Ok(vec![])
    }

    async fn count(&self) -> Result<u64, AppError> {
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Build an extraction result for `locator`.
pub fn make_result(locator: &str, price: Option<f64>, stock: StockStatus) -> ExtractionResult {
    ExtractionResult::new(
        locator,
        "generic",
        ProductFields {
            name: "Test Product".into(),
            price,
            stock,
            ..Default::default()
        },
        Utc::now(),
    )
}

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::AppError;
use crate::job::{BatchRun, BatchSummary};
use crate::models::{ChangeHistoryEntry, ExtractionResult, ProductFields, ProductRecord, UpsertOutcome};
use crate::query::ProductQuery;

/// What an open browsing context currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSnapshot {
    /// The locator the context was opened for.
    pub locator: String,
    /// Where the page ended up after redirects.
    pub final_url: String,
    pub html: String,
}

/// Supplies isolated, ephemeral browsing contexts, one per job.
pub trait ContextProvider: Send + Sync + Clone + 'static {
    type Handle: Send + Sync + 'static;

    /// Create a fresh context bound to `locator` and start loading it.
    ///
    /// Implementations bound their own navigation and release whatever they
    /// created before returning an error. Callers stop waiting at the job
    /// deadline but let a late open finish so its context can be closed.
    fn open(&self, locator: &str) -> impl Future<Output = Result<Self::Handle, AppError>> + Send;

    /// Resolve once the page reports load complete. Callers cap this with
    /// their own deadline; implementations may also give up after `timeout`.
    fn wait_until_ready(
        &self,
        handle: &Self::Handle,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Capture the current document.
    fn snapshot(
        &self,
        handle: &Self::Handle,
    ) -> impl Future<Output = Result<PageSnapshot, AppError>> + Send;

    /// Release the context. Errors here never fail a job.
    fn close(&self, handle: Self::Handle) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Reads product fields off a loaded page.
pub trait ExtractionCapability: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    fn extract(&self, page: &PageSnapshot) -> Result<ProductFields, AppError>;
}

/// Builds the capability registered for a platform id.
pub trait CapabilityFactory: Send + Sync {
    fn create(&self, platform: &str) -> Result<Arc<dyn ExtractionCapability>, AppError>;
}

impl<F> CapabilityFactory for F
where
    F: Fn(&str) -> Result<Arc<dyn ExtractionCapability>, AppError> + Send + Sync,
{
    fn create(&self, platform: &str) -> Result<Arc<dyn ExtractionCapability>, AppError> {
        self(platform)
    }
}

/// Persists product records keyed by normalized locator.
///
/// `upsert` must be atomic per key: two concurrent calls for the same
/// normalized locator never create two records.
pub trait ProductStore: Send + Sync + Clone + 'static {
    fn upsert(
        &self,
        result: &ExtractionResult,
    ) -> impl Future<Output = Result<UpsertOutcome, AppError>> + Send;

    fn get(&self, id: Uuid) -> impl Future<Output = Result<Option<ProductRecord>, AppError>> + Send;

    /// Look up by any locator that normalizes to the stored key.
    fn get_by_locator(
        &self,
        locator: &str,
    ) -> impl Future<Output = Result<Option<ProductRecord>, AppError>> + Send;

    fn query(
        &self,
        query: &ProductQuery,
    ) -> impl Future<Output = Result<Vec<ProductRecord>, AppError>> + Send;

    /// Change history for a product, newest first.
    fn history(
        &self,
        product_id: Uuid,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ChangeHistoryEntry>, AppError>> + Send;

    fn count(&self) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Keeps finished batch runs around after the orchestrator drops them.
pub trait RunArchive: Send + Sync + Clone + 'static {
    fn archive(&self, run: &BatchRun) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Most recently finished runs first.
    fn recent(&self, limit: usize) -> impl Future<Output = Result<Vec<BatchSummary>, AppError>> + Send;
}

/// A no-op RunArchive for use when run history is not needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullArchive;

impl RunArchive for NullArchive {
    async fn archive(&self, _run: &BatchRun) -> Result<(), AppError> {
        Ok(())
    }

    async fn recent(&self, _limit: usize) -> Result<Vec<BatchSummary>, AppError> {
        Ok(vec![])
    }
}

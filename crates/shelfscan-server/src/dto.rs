use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shelfscan_core::{BatchRun, BatchSummary, ChangeHistoryEntry, Job, ProductRecord};

// ---------------------------------------------------------------------------
// Batches
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SubmitBatchRequest {
    /// Product page URLs, collected in this order
    pub locators: Vec<String>,
    /// Free-form label stored with the run
    pub label: Option<String>,
    /// Pause between page loads in milliseconds (falls back to SHELFSCAN_DELAY_MS)
    pub delay_ms: Option<u64>,
    /// Random extra pause added to each delay, in milliseconds
    pub jitter_ms: Option<u64>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SubmitBatchResponse {
    pub run_id: Uuid,
    pub total: usize,
    pub status: String,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListBatchesQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub index: usize,
    pub locator: String,
    pub status: String,
    pub platform: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub product_id: Option<Uuid>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            index: job.index,
            locator: job.locator,
            status: job.status.to_string(),
            platform: job.platform,
            enqueued_at: job.enqueued_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
            error: job.error,
            product_id: job.product_id,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BatchSummaryResponse {
    pub run_id: Uuid,
    pub label: Option<String>,
    /// "running", "cancelling", "finished" or "cancelled"
    pub status: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub created: usize,
    pub updated: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<BatchSummary> for BatchSummaryResponse {
    fn from(s: BatchSummary) -> Self {
        Self {
            status: run_status(s.cancelled, s.finished_at.is_some()).to_string(),
            run_id: s.run_id,
            label: s.label,
            total: s.total,
            succeeded: s.succeeded,
            failed: s.failed,
            skipped: s.skipped,
            created: s.created,
            updated: s.updated,
            started_at: s.started_at,
            finished_at: s.finished_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BatchRunResponse {
    #[serde(flatten)]
    pub summary: BatchSummaryResponse,
    /// Jobs finished so far, successful or not
    pub completed: usize,
    pub running: usize,
    pub jobs: Vec<JobResponse>,
}

impl From<BatchRun> for BatchRunResponse {
    fn from(run: BatchRun) -> Self {
        let completed = run.completed_count;
        let running = run.running_count();
        Self {
            summary: run.summary().into(),
            completed,
            running,
            jobs: run.jobs.into_iter().map(JobResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BatchListResponse {
    /// Run currently being collected, if any
    pub active_run: Option<Uuid>,
    pub runs: Vec<BatchSummaryResponse>,
    pub total: usize,
}

fn run_status(cancelled: bool, finished: bool) -> &'static str {
    match (cancelled, finished) {
        (false, false) => "running",
        (true, false) => "cancelling",
        (false, true) => "finished",
        (true, true) => "cancelled",
    }
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ProductsQuery {
    pub platform: Option<String>,
    /// Exact category match
    pub category: Option<String>,
    /// Case-insensitive substring of the product name
    pub name: Option<String>,
    /// Case-insensitive substring of the description
    pub description: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    /// name, price, collected_at, updated_at or platform
    pub sort: Option<String>,
    /// asc (default) or desc
    pub order: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProductOptionResponse {
    pub name: String,
    pub values: Vec<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProductResponse {
    pub id: Uuid,
    pub locator: String,
    pub locator_key: String,
    pub platform: String,
    pub name: String,
    pub price: Option<f64>,
    pub images: Vec<String>,
    pub options: Vec<ProductOptionResponse>,
    pub description: Option<String>,
    pub stock: String,
    pub category: Option<String>,
    pub data_hash: String,
    pub collected_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProductRecord> for ProductResponse {
    fn from(r: ProductRecord) -> Self {
        let f = r.fields;
        Self {
            id: r.id,
            locator: r.locator,
            locator_key: r.locator_key,
            platform: r.platform,
            name: f.name,
            price: f.price,
            images: f.images,
            options: f
                .options
                .into_iter()
                .map(|o| ProductOptionResponse {
                    name: o.name,
                    values: o.values,
                })
                .collect(),
            description: f.description,
            stock: f.stock.as_str().to_string(),
            category: f.category,
            data_hash: r.data_hash,
            collected_at: r.collected_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ProductListResponse {
    pub products: Vec<ProductResponse>,
    pub total: usize,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ChangeResponse {
    pub id: Uuid,
    pub old_price: Option<f64>,
    pub new_price: Option<f64>,
    pub old_stock: String,
    pub new_stock: String,
    /// price_up, price_down, stock_change
    pub change_kinds: Vec<String>,
    pub changed_at: DateTime<Utc>,
}

impl From<ChangeHistoryEntry> for ChangeResponse {
    fn from(c: ChangeHistoryEntry) -> Self {
        Self {
            id: c.id,
            old_price: c.old_price,
            new_price: c.new_price,
            old_stock: c.old_stock.as_str().to_string(),
            new_stock: c.new_stock.as_str().to_string(),
            change_kinds: c.change_kinds.iter().map(|k| k.as_str().to_string()).collect(),
            changed_at: c.timestamp,
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HistoryResponse {
    pub product_id: Uuid,
    pub changes: Vec<ChangeResponse>,
    pub total: usize,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: &'static str,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod locator;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod query;
pub mod rate_limiter;
pub mod store;
pub mod traits;
pub mod util;

#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use config::OrchestratorConfig;
pub use dispatch::{CapabilityRegistry, GENERIC_PLATFORM, LocatorPattern, PlatformRule, Resolution};
pub use error::AppError;
pub use job::{BatchRun, BatchSummary, Job, JobStatus, SubmitOptions};
pub use lifecycle::{LifecycleConfig, PageLifecycle};
pub use models::{
    ChangeHistoryEntry, ChangeKind, ExtractionResult, ProductFields, ProductOption, ProductRecord,
    StockStatus, UpsertKind, UpsertOutcome, compute_hash,
};
pub use orchestrator::{BatchRunHandle, Orchestrator};
pub use progress::{BatchEvent, ProgressSink, TracingProgressSink};
pub use query::{ProductQuery, SortKey, SortOrder};
pub use rate_limiter::RateLimitConfig;
pub use store::MemoryProductStore;
pub use traits::{
    CapabilityFactory, ContextProvider, ExtractionCapability, NullArchive, PageSnapshot,
    ProductStore, RunArchive,
};

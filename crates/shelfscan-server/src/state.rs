use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use shelfscan_core::error::AppError;
use shelfscan_core::{
    BatchRunHandle, ContextProvider, Orchestrator, RateLimitConfig, SubmitOptions,
    TracingProgressSink,
};
use shelfscan_db::{BatchRunRepository, Database, ProductRepository};
use uuid::Uuid;

/// Orchestrator wired to the PostgreSQL product store and run archive.
pub type ServerOrchestrator<P> = Orchestrator<P, ProductRepository, BatchRunRepository>;

/// The part of the orchestrator the HTTP layer drives, with the context
/// provider erased.
pub trait BatchSubmitter: Send + Sync {
    fn submit(&self, locators: Vec<String>, options: SubmitOptions)
    -> Result<BatchRunHandle, AppError>;

    fn active_run(&self) -> Option<Uuid>;

    fn rate_limit(&self) -> RateLimitConfig;
}

impl<P: ContextProvider> BatchSubmitter for ServerOrchestrator<P> {
    fn submit(
        &self,
        locators: Vec<String>,
        options: SubmitOptions,
    ) -> Result<BatchRunHandle, AppError> {
        self.submit_batch(locators, options, Arc::new(TracingProgressSink))
    }

    fn active_run(&self) -> Option<Uuid> {
        Orchestrator::active_run(self)
    }

    fn rate_limit(&self) -> RateLimitConfig {
        self.config().rate_limit
    }
}

/// Shared application state, available to all route handlers via `State<Arc<AppState>>`.
pub struct AppState {
    pub db: Database,
    pub orchestrator: Box<dyn BatchSubmitter>,
    /// Admin API key for protecting `/v1` endpoints (None = endpoints disabled).
    pub admin_token: Option<String>,
    runs: Mutex<HashMap<Uuid, BatchRunHandle>>,
}

impl AppState {
    pub fn new<P: ContextProvider>(
        db: Database,
        orchestrator: ServerOrchestrator<P>,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            db,
            orchestrator: Box::new(orchestrator),
            admin_token,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Remember a freshly submitted run. Handles of finished runs are
    /// dropped here; their state lives on in the archive.
    pub fn track(&self, handle: BatchRunHandle) {
        let mut runs = self.lock_runs();
        runs.retain(|_, h| !h.is_finished());
        runs.insert(handle.id(), handle);
    }

    /// Handle of a run submitted through this server, if still held.
    pub fn run(&self, id: Uuid) -> Option<BatchRunHandle> {
        self.lock_runs().get(&id).cloned()
    }

    fn lock_runs(&self) -> MutexGuard<'_, HashMap<Uuid, BatchRunHandle>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

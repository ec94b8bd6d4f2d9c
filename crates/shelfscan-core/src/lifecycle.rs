//! Page lifecycle: open -> wait for ready -> settle -> extract -> close.
//!
//! Every job gets its own context from a [`ContextProvider`] and that
//! context is closed on every exit path, including extraction errors and
//! the job deadline firing.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::error::AppError;
use crate::models::ExtractionResult;
use crate::traits::{ContextProvider, ExtractionCapability};

/// Time held back from the load wait for snapshot and extraction.
const EXTRACT_RESERVE: Duration = Duration::from_secs(2);

/// Timing knobs for a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// How long to wait for the page to report load complete.
    pub load_timeout: Duration,
    /// Extra pause after readiness so client-rendered content can appear.
    pub settle_delay: Duration,
    /// Hard cap on a whole job, open through extraction.
    pub job_timeout: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            load_timeout: Duration::from_millis(15_000),
            settle_delay: Duration::from_millis(1_000),
            job_timeout: Duration::from_secs(60),
        }
    }
}

/// Runs jobs against contexts from one provider.
#[derive(Debug, Clone)]
pub struct PageLifecycle<P> {
    provider: P,
    config: LifecycleConfig,
}

impl<P: ContextProvider> PageLifecycle<P> {
    pub fn new(provider: P, config: LifecycleConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Load `locator` in a fresh context and extract it with `capability`.
    pub async fn run_job(
        &self,
        locator: &str,
        platform: &str,
        capability: Arc<dyn ExtractionCapability>,
    ) -> Result<ExtractionResult, AppError> {
        let deadline = tokio::time::Instant::now() + self.config.job_timeout;
        let job_timeout_ms = self.config.job_timeout.as_millis() as u64;

        // The open runs on its own task so a late context can still be closed
        // after the deadline gives up on it.
        let provider = self.provider.clone();
        let owned = locator.to_string();
        let mut opening = tokio::spawn(async move { provider.open(&owned).await });

        let waited = tokio::time::timeout_at(deadline, &mut opening).await;
        let opened = match waited {
            Ok(joined) => joined.map_err(|e| AppError::Generic(e.to_string())).and_then(|r| r),
            Err(_) => {
                let provider = self.provider.clone();
                let owned = locator.to_string();
                tokio::spawn(async move {
                    if let Ok(Ok(handle)) = opening.await {
                        tracing::debug!(locator = %owned, "Closing context that opened after the job deadline");
                        if let Err(e) = provider.close(handle).await {
                            tracing::debug!(locator = %owned, error = %e, "Context close failed (ignored)");
                        }
                    }
                });
                return Err(AppError::JobTimeout(job_timeout_ms));
            }
        };
        let handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                return Err(match e {
                    AppError::ContextOpen { .. } => e,
                    other => AppError::ContextOpen {
                        locator: locator.to_string(),
                        message: other.to_string(),
                    },
                });
            }
        };

        let outcome = tokio::time::timeout_at(
            deadline,
            self.drive(&handle, locator, platform, capability.as_ref(), deadline),
        )
        .await
        .unwrap_or(Err(AppError::JobTimeout(job_timeout_ms)));

        if let Err(e) = self.provider.close(handle).await {
            tracing::debug!(%locator, error = %e, "Context close failed (ignored)");
        }

        outcome
    }

    async fn drive(
        &self,
        handle: &P::Handle,
        locator: &str,
        platform: &str,
        capability: &dyn ExtractionCapability,
        deadline: tokio::time::Instant,
    ) -> Result<ExtractionResult, AppError> {
        // The load wait never eats the time the settle and snapshot need.
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let load_timeout = self
            .config
            .load_timeout
            .min(remaining.saturating_sub(self.config.settle_delay + EXTRACT_RESERVE));
        let ready = tokio::time::timeout(
            load_timeout,
            self.provider.wait_until_ready(handle, load_timeout),
        )
        .await
        .unwrap_or(Err(AppError::LoadTimeout(load_timeout.as_millis() as u64)));

        if let Err(e) = ready {
            // Many storefronts never go idle; extract whatever rendered.
            tracing::warn!(%locator, error = %e, "Page not ready, extracting anyway");
        }

        if !self.config.settle_delay.is_zero() {
            tokio::time::sleep(self.config.settle_delay).await;
        }

        let page = self.provider.snapshot(handle).await?;
        let fields = capability.extract(&page).map_err(AppError::into_extraction)?;

        tracing::debug!(
            %locator,
            %platform,
            capability = capability.name(),
            name = %fields.name,
            "Extracted product"
        );

        Ok(ExtractionResult::new(locator, platform, fields, Utc::now()))
    }
}

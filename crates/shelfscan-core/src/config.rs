use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;
use crate::lifecycle::LifecycleConfig;
use crate::rate_limiter::RateLimitConfig;

/// Settings for an [`crate::orchestrator::Orchestrator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Jobs in flight at once. `1` reproduces strict one-at-a-time runs.
    pub workers: usize,
    pub lifecycle: LifecycleConfig,
    /// Default delay between jobs; a submission may override it.
    pub rate_limit: RateLimitConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            lifecycle: LifecycleConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from `SHELFSCAN_*` environment variables, falling back to defaults.
    ///
    /// - `SHELFSCAN_WORKERS`
    /// - `SHELFSCAN_LOAD_TIMEOUT_MS`
    /// - `SHELFSCAN_SETTLE_MS`
    /// - `SHELFSCAN_JOB_TIMEOUT_MS`
    /// - `SHELFSCAN_DELAY_MS`
    /// - `SHELFSCAN_JITTER_MS`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();
        let millis = |key: &str, default: Duration| -> Result<Duration, AppError> {
            Ok(parse_var::<u64>(&lookup, key)?.map_or(default, Duration::from_millis))
        };

        let config = Self {
            workers: parse_var(&lookup, "SHELFSCAN_WORKERS")?.unwrap_or(defaults.workers),
            lifecycle: LifecycleConfig {
                load_timeout: millis("SHELFSCAN_LOAD_TIMEOUT_MS", defaults.lifecycle.load_timeout)?,
                settle_delay: millis("SHELFSCAN_SETTLE_MS", defaults.lifecycle.settle_delay)?,
                job_timeout: millis("SHELFSCAN_JOB_TIMEOUT_MS", defaults.lifecycle.job_timeout)?,
            },
            rate_limit: RateLimitConfig {
                delay: millis("SHELFSCAN_DELAY_MS", defaults.rate_limit.delay)?,
                jitter: millis("SHELFSCAN_JITTER_MS", defaults.rate_limit.jitter)?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.workers == 0 {
            return Err(AppError::ConfigError("workers must be at least 1".into()));
        }
        if self.lifecycle.job_timeout.is_zero() {
            return Err(AppError::ConfigError("job timeout must be positive".into()));
        }
        let lifecycle = &self.lifecycle;
        if lifecycle.load_timeout + lifecycle.settle_delay >= lifecycle.job_timeout {
            return Err(AppError::ConfigError(format!(
                "job timeout ({}ms) must exceed load timeout plus settle delay ({}ms)",
                lifecycle.job_timeout.as_millis(),
                (lifecycle.load_timeout + lifecycle.settle_delay).as_millis()
            )));
        }
        Ok(())
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn with_load_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle.load_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.lifecycle.settle_delay = delay;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.lifecycle.job_timeout = timeout;
        self
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, AppError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| AppError::ConfigError(format!("{key} has an invalid value: '{raw}'"))),
    }
}

use thiserror::Error;
use uuid::Uuid;

/// Application-wide error types for shelfscan.
#[derive(Error, Debug)]
pub enum AppError {
    /// A locator could not be parsed as an http(s) URL.
    #[error("Invalid locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },

    /// A batch submission was rejected before any job was created.
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// The orchestrator already drives a live run.
    #[error("Batch run {0} is still active")]
    BatchAlreadyRunning(Uuid),

    /// The browsing context for a job could not be created.
    #[error("Failed to open page context for {locator}: {message}")]
    ContextOpen { locator: String, message: String },

    /// The page never signalled readiness. Not fatal to the job.
    #[error("Page not ready after {0} ms")]
    LoadTimeout(u64),

    /// The extraction capability produced no record.
    #[error("Extraction failed: {0}")]
    Extraction(String),

    /// A whole job exceeded its hard deadline.
    #[error("Job exceeded its {0} ms deadline")]
    JobTimeout(u64),

    /// An extracted record could not be persisted.
    #[error("Failed to store result: {0}")]
    StoreWrite(String),

    /// HTTP request failed (loading a page).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Local file access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error ends the job it occurred in.
    ///
    /// A load timeout only means the page never reached a clean idle state;
    /// the job carries on with whatever the page rendered.
    pub fn is_job_fatal(&self) -> bool {
        !matches!(self, AppError::LoadTimeout(_))
    }

    /// Returns true if the caller misused the submission entry point.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            AppError::InvalidLocator { .. }
                | AppError::InvalidBatch(_)
                | AppError::BatchAlreadyRunning(_)
        )
    }

    /// Wraps any non-storage error as a [`AppError::StoreWrite`].
    pub fn into_store_write(self) -> Self {
        match self {
            AppError::StoreWrite(_) => self,
            other => AppError::StoreWrite(other.to_string()),
        }
    }

    /// Wraps any non-extraction error as an [`AppError::Extraction`].
    pub fn into_extraction(self) -> Self {
        match self {
            AppError::Extraction(_) => self,
            other => AppError::Extraction(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_load_timeout_is_non_fatal() {
        assert!(!AppError::LoadTimeout(15_000).is_job_fatal());
        assert!(AppError::Extraction("no name".into()).is_job_fatal());
        assert!(
            AppError::ContextOpen {
                locator: "https://shop.example/p/1".into(),
                message: "refused".into(),
            }
            .is_job_fatal()
        );
        assert!(AppError::StoreWrite("disk full".into()).is_job_fatal());
    }

    #[test]
    fn test_caller_errors() {
        assert!(AppError::InvalidBatch("empty".into()).is_caller_error());
        assert!(AppError::BatchAlreadyRunning(Uuid::nil()).is_caller_error());
        assert!(!AppError::JobTimeout(60_000).is_caller_error());
    }

    #[test]
    fn test_into_store_write_keeps_original_message() {
        let err = AppError::DatabaseError("connection reset".into()).into_store_write();
        assert!(matches!(&err, AppError::StoreWrite(msg) if msg.contains("connection reset")));

        let err = AppError::StoreWrite("already wrapped".into()).into_store_write();
        assert_eq!(err.to_string(), "Failed to store result: already wrapped");
    }
}

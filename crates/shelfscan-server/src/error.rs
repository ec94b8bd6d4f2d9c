use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use shelfscan_core::error::AppError;

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            AppError::InvalidLocator { .. } | AppError::InvalidBatch(_) => {
                (StatusCode::BAD_REQUEST, "validation_error")
            }
            AppError::BatchAlreadyRunning(_) => (StatusCode::CONFLICT, "conflict"),
            AppError::SerializationError(_) => (StatusCode::BAD_REQUEST, "serialization_error"),
            AppError::DatabaseError(_) | AppError::StoreWrite(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error")
            }
            AppError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::LoadTimeout(_) | AppError::JobTimeout(_) => {
                (StatusCode::GATEWAY_TIMEOUT, "timeout")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.0.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}

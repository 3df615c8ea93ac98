use std::io;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid search input: {0}")]
    InvalidInput(String),
    #[error("location could not be resolved: {0}")]
    LocationNotFound(String),
    #[error("{service} request failed: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Keychain(#[from] keyring::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Config(String),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("park search was cancelled")]
    Cancelled,
}

impl AppError {
    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        AppError::Upstream {
            service,
            message: message.into(),
        }
    }

    /// Short tag used in telemetry payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::LocationNotFound(_) => "location_not_found",
            AppError::Upstream { .. } | AppError::Http(_) => "upstream_unavailable",
            AppError::Io(_) => "io",
            AppError::Database(_) => "database",
            AppError::Keychain(_) => "keychain",
            AppError::Json(_) => "json",
            AppError::Config(_) => "config",
            AppError::Task(_) => "internal",
            AppError::Cancelled => "cancelled",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::LocationNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream { .. } | AppError::Http(_) => StatusCode::BAD_GATEWAY,
            AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_taxonomy_to_status_codes() {
        assert_eq!(
            AppError::InvalidInput("radius".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::LocationNotFound("Atlantis".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::upstream("places", "timeout").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Config("missing key".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AppError::Cancelled.kind(), "cancelled");
    }

    #[tokio::test]
    async fn panicked_tasks_surface_as_internal_errors() {
        let joined = tokio::task::spawn_blocking(|| panic!("boom")).await;
        let err: AppError = joined.unwrap_err().into();
        assert_eq!(err.kind(), "internal");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

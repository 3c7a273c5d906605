use axum::Json;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::utils::error_codes;

/// Service-wide error taxonomy. Validation and authorization failures carry
/// the text shown to the client; storage failures keep the real cause
/// server-side and surface only generic text.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("{0}")]
    Enrichment(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: i32,
    msg: String,
    resp_data: Option<()>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, msg) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, error_codes::VALIDATION_ERROR, msg),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                error_codes::AUTH_FAILED,
                "unauthorized".to_string(),
            ),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, error_codes::PERMISSION_DENIED, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, error_codes::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, error_codes::USER_EXISTS, msg),
            AppError::Storage(e) => {
                // Real cause stays in the logs, never in the response body.
                tracing::error!("storage error: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    error_codes::INTERNAL_ERROR,
                    "storage temporarily unavailable".to_string(),
                )
            }
            AppError::Enrichment(msg) => {
                tracing::error!("enrichment failed: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    error_codes::INTERNAL_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code,
            msg,
            resp_data: None,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn response_parts(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn conflict_maps_to_user_exists() {
        let (status, body) = response_parts(AppError::Conflict("user already exists".into())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], error_codes::USER_EXISTS);
        assert_eq!(body["msg"], "user already exists");
    }

    #[tokio::test]
    async fn storage_error_hides_real_cause() {
        let (status, body) = response_parts(AppError::Storage(sqlx::Error::PoolTimedOut)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["msg"], "storage temporarily unavailable");
    }

    #[tokio::test]
    async fn forbidden_keeps_client_text() {
        let (status, body) =
            response_parts(AppError::Forbidden("creator cannot leave the group".into())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], error_codes::PERMISSION_DENIED);
        assert_eq!(body["msg"], "creator cannot leave the group");
    }
}

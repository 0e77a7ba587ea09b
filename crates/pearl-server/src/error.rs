//! The HTTP-boundary error type: wraps every crate's error taxonomy into one
//! enum that knows how to render itself as a JSON error body with the
//! matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("auth not configured")]
    AuthNotConfigured,
    #[error(transparent)]
    Store(#[from] pearl_store::StoreError),
    #[error(transparent)]
    Backend(#[from] pearl_backends::BackendError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    message: String,
    code: String,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::AuthNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Backend(e) => match e {
                pearl_backends::BackendError::Authentication(_) => StatusCode::UNAUTHORIZED,
                pearl_backends::BackendError::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
                pearl_backends::BackendError::Validation(_) => StatusCode::BAD_REQUEST,
                pearl_backends::BackendError::Network(_) => StatusCode::BAD_GATEWAY,
                pearl_backends::BackendError::Backend { status, .. } => {
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
                }
            },
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound(_) => "not_found",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::Unauthorized => "unauthorized",
            ApiError::AuthNotConfigured => "auth_not_configured",
            ApiError::Store(_) => "store_error",
            ApiError::Backend(e) => e.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            error: ErrorDetail {
                message: self.to_string(),
                code: self.code().to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

//! Error types for crowd-entities HTTP handlers

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// crowd-common error, status chosen by variant
    #[error(transparent)]
    Common(#[from] crowd_common::Error),
}

fn common_status(err: &crowd_common::Error) -> (StatusCode, &'static str) {
    use crowd_common::Error;

    match err {
        Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
        Error::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
        Error::DataIntegrity(_) => (StatusCode::UNPROCESSABLE_ENTITY, "DATA_INTEGRITY"),
        Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        Error::Timeout(_) => (StatusCode::SERVICE_UNAVAILABLE, "TIMEOUT"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Common(ref err) => {
                let (status, code) = common_status(err);
                (status, code, err.to_string())
            }
        };

        if status.is_server_error() {
            tracing::error!(code = error_code, error = %message, "Request failed");
        }

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_errors_map_to_status() {
        let cases = [
            (crowd_common::Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (crowd_common::Error::Conflict("x".into()), StatusCode::CONFLICT),
            (crowd_common::Error::DataIntegrity("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (crowd_common::Error::InvalidInput("x".into()), StatusCode::BAD_REQUEST),
            (crowd_common::Error::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_handler_errors_map_to_client_status() {
        let not_found = ApiError::NotFound("merge action".into()).into_response();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let bad_request = ApiError::BadRequest("segmentId".into()).into_response();
        assert_eq!(bad_request.status(), StatusCode::BAD_REQUEST);
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP error responses.
//!
//! Every failure leaves the server as
//! `{"error": {"code": "...", "message": "..."}}` with a status derived from
//! the error code.

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reboque_core::CoreError;
use serde_json::json;
use tracing::error;

/// Errors returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A dispatch operation failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Missing, malformed or expired bearer token.
    #[error("{0}")]
    Unauthorized(String),

    /// Webhook signature did not match the body.
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// Body or query could not be parsed.
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Core(e) => e.error_code(),
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::BadRequest(_) => "BAD_REQUEST",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self.code() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "INVALID_REQUEST_STATE" | "CONFLICT" => StatusCode::CONFLICT,
            "REQUEST_EXPIRED" => StatusCode::GONE,
            "VALIDATION_ERROR" | "BAD_REQUEST" => StatusCode::BAD_REQUEST,
            "UPSTREAM_ERROR" => StatusCode::BAD_GATEWAY,
            "UNAUTHORIZED" | "INVALID_SIGNATURE" => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Internal error");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));
        (status, body).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// Result type for HTTP handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    fn core_status(err: CoreError) -> StatusCode {
        ApiError::from(err).status()
    }

    #[test]
    fn test_core_errors_map_to_statuses() {
        assert_eq!(
            core_status(CoreError::NotFound {
                entity: "request",
                id: "r".into()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            core_status(CoreError::Forbidden {
                reason: "no".into()
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            core_status(CoreError::InvalidRequestState {
                request_id: "r".into(),
                expected: "accepted".into(),
                actual: "paid".into(),
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            core_status(CoreError::Conflict {
                message: "dup".into()
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            core_status(CoreError::RequestExpired {
                request_id: "r".into()
            }),
            StatusCode::GONE
        );
        assert_eq!(
            core_status(CoreError::ValidationError {
                field: "price_cents".into(),
                message: "must be positive".into(),
            }),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            core_status(CoreError::UpstreamError {
                service: "payments",
                details: "timeout".into(),
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            core_status(CoreError::DatabaseError {
                operation: "query".into(),
                details: "locked".into(),
            }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::from(CoreError::RequestExpired {
            request_id: "req-1".into(),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::GONE);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "REQUEST_EXPIRED");
        assert!(body["error"]["message"].as_str().unwrap().contains("req-1"));
    }

    #[tokio::test]
    async fn test_database_details_are_not_leaked() {
        let response = ApiError::from(CoreError::DatabaseError {
            operation: "insert".into(),
            details: "password authentication failed".into(),
        })
        .into_response();

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "DATABASE_ERROR");
        assert_eq!(body["error"]["message"], "internal server error");
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for reboque-core.
//!
//! Provides a unified error type with stable error codes that the HTTP layer
//! maps to response statuses.

use std::fmt;

/// Result type using CoreError
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur during request processing.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum CoreError {
    /// A referenced entity (request, proposal, payment, user) does not exist.
    NotFound {
        /// Kind of entity ("request", "proposal", ...).
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The caller is not allowed to perform the operation.
    Forbidden {
        /// Why access was refused.
        reason: String,
    },

    /// Request is in a state that does not allow the operation.
    InvalidRequestState {
        /// The request ID.
        request_id: String,
        /// The status(es) the operation needs.
        expected: String,
        /// The actual status.
        actual: String,
    },

    /// Request passed its expiry deadline before the operation could run.
    RequestExpired {
        /// The request ID.
        request_id: String,
    },

    /// Operation conflicts with existing data (duplicate payment, stale proposal).
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// Input validation failed.
    ValidationError {
        /// The field that failed validation.
        field: String,
        /// The validation error message.
        message: String,
    },

    /// An external collaborator (payment gateway) failed.
    UpstreamError {
        /// Which collaborator failed.
        service: &'static str,
        /// Error details.
        details: String,
    },

    /// Database operation failed.
    DatabaseError {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },
}

impl CoreError {
    /// Get the error code string for this error type.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::InvalidRequestState { .. } => "INVALID_REQUEST_STATE",
            Self::RequestExpired { .. } => "REQUEST_EXPIRED",
            Self::Conflict { .. } => "CONFLICT",
            Self::ValidationError { .. } => "VALIDATION_ERROR",
            Self::UpstreamError { .. } => "UPSTREAM_ERROR",
            Self::DatabaseError { .. } => "DATABASE_ERROR",
        }
    }

    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { entity, id } => {
                write!(f, "{} '{}' not found", capitalize(entity), id)
            }
            Self::Forbidden { reason } => write!(f, "Forbidden: {}", reason),
            Self::InvalidRequestState {
                request_id,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "Request '{}' is in invalid state: expected '{}', got '{}'",
                    request_id, expected, actual
                )
            }
            Self::RequestExpired { request_id } => {
                write!(f, "Request '{}' has expired", request_id)
            }
            Self::Conflict { message } => write!(f, "Conflict: {}", message),
            Self::ValidationError { field, message } => {
                write!(f, "Validation error for '{}': {}", field, message)
            }
            Self::UpstreamError { service, details } => {
                write!(f, "Upstream {} error: {}", service, details)
            }
            Self::DatabaseError { operation, details } => {
                write!(f, "Database error during '{}': {}", operation, details)
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl std::error::Error for CoreError {}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        CoreError::DatabaseError {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::DatabaseError {
            operation: "json".to_string(),
            details: err.to_string(),
        }
    }
}

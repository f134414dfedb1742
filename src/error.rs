use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::models::entry::EntryId;

/// JSON body returned for every failed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Errors surfaced by the timetable engine and the HTTP handlers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Save referenced entries the catalog does not contain
    #[error("Unknown schedule entries: {}", .ids.join(", "))]
    UnknownEntries { ids: Vec<EntryId> },

    #[error("Invalid request: {0}")]
    Validation(String),

    /// Catalog or selection store failed or timed out
    #[error("{dependency} unavailable: {reason}")]
    DependencyUnavailable { dependency: String, reason: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn dependency(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        ServiceError::DependencyUnavailable {
            dependency: dependency.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::DependencyUnavailable { .. })
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::UnknownEntries { .. } | ServiceError::Validation(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::DependencyUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ServiceError::UnknownEntries { .. } | ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::DependencyUnavailable { .. } => "DEPENDENCY_UNAVAILABLE",
            ServiceError::Unauthorized(_) => "UNAUTHORIZED",
            ServiceError::Forbidden(_) => "FORBIDDEN",
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Conflict(_) => "CONFLICT",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        let mut body = ApiError::new(self.code(), self.to_string());
        if let ServiceError::UnknownEntries { ids } = &self {
            body = body.with_details(ids.join(","));
        }

        (status, Json(body)).into_response()
    }
}

impl From<csv::Error> for ServiceError {
    fn from(err: csv::Error) -> Self {
        ServiceError::dependency("storage", err.to_string())
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::dependency("storage", err.to_string())
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::dependency("catalog", err.to_string())
    }
}

/// Errors raised while reading configuration at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set in environment")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

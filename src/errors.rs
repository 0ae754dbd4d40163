//! Discriminated application error type and its HTTP/metadata mapping.
//!
//! Every fallible operation in the request-lifecycle, permission, selector,
//! dispatcher, reconciler and scheduler layers returns `Result<T, AppError>`.
//! Internal errors (DB, HTTP client) are wrapped at the boundary so nothing
//! upstream leaks raw `sqlx`/`reqwest` text to a caller.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Warn,
    Error,
}

/// A conflict sub-reason for [`AppError::RequestConflict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    AlreadyRequestedMovie,
    WholeSeriesExists,
    SeasonExists,
    EpisodeExists,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::AlreadyRequestedMovie => "already_requested_movie",
            ConflictReason::WholeSeriesExists => "whole_series_exists",
            ConflictReason::SeasonExists => "season_exists",
            ConflictReason::EpisodeExists => "episode_exists",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("authentication required")]
    AuthRequired,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("request limit reached ({current}/{limit})")]
    QuotaExceeded { current: i64, limit: i64 },

    #[error("user cannot request media type {0}")]
    MediaTypeForbidden(String),

    #[error("no accessible service instance for this request")]
    InstanceUnavailable,

    #[error("request conflict: {reason:?}")]
    RequestConflict { reason: ConflictReason },

    #[error("integration call timed out")]
    IntegrationTimeout,

    #[error("integration upstream error (status {status:?})")]
    IntegrationUpstreamError { status: Option<u16> },

    #[error("job already running")]
    JobAlreadyRunning,

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl AppError {
    pub fn not_found(entity: impl Into<String>) -> Self {
        AppError::NotFound(entity.into())
    }

    pub fn conflict(reason: ConflictReason) -> Self {
        AppError::RequestConflict { reason }
    }

    pub fn http_status_code(&self) -> StatusCode {
        match self {
            AppError::AuthRequired => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::MediaTypeForbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::QuotaExceeded { .. } => StatusCode::CONFLICT,
            AppError::InstanceUnavailable => StatusCode::CONFLICT,
            AppError::RequestConflict { .. } => StatusCode::CONFLICT,
            AppError::JobAlreadyRunning => StatusCode::CONFLICT,
            AppError::IntegrationTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::IntegrationUpstreamError { .. } => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::AuthRequired => "AUTH_REQUIRED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Validation(_) => "VALIDATION",
            AppError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            AppError::MediaTypeForbidden(_) => "MEDIA_TYPE_FORBIDDEN",
            AppError::InstanceUnavailable => "INSTANCE_UNAVAILABLE",
            AppError::RequestConflict { .. } => "REQUEST_CONFLICT",
            AppError::IntegrationTimeout => "INTEGRATION_TIMEOUT",
            AppError::IntegrationUpstreamError { .. } => "INTEGRATION_UPSTREAM_ERROR",
            AppError::JobAlreadyRunning => "JOB_ALREADY_RUNNING",
            AppError::Internal(_) => "INTERNAL",
        }
    }

    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AppError::Internal(_))
    }

    pub fn log_level(&self) -> LogLevel {
        match self {
            AppError::Internal(_) | AppError::IntegrationUpstreamError { .. } => LogLevel::Error,
            AppError::IntegrationTimeout | AppError::InstanceUnavailable => LogLevel::Warn,
            _ => LogLevel::Debug,
        }
    }

    /// Message safe to return to an API caller; internal errors never leak detail.
    pub fn client_message(&self) -> String {
        match self {
            AppError::Internal(_) => "an internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(anyhow::anyhow!(e))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AppError::IntegrationTimeout
        } else {
            AppError::IntegrationUpstreamError {
                status: e.status().map(|s| s.as_u16()),
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.log_level() {
            LogLevel::Error => tracing::error!(error = %self, code = self.error_code(), "request failed"),
            LogLevel::Warn => tracing::warn!(error = %self, code = self.error_code(), "request failed"),
            LogLevel::Debug => tracing::debug!(error = %self, code = self.error_code(), "request failed"),
        }
        let reason = match &self {
            AppError::RequestConflict { reason } => Some(reason.as_str()),
            _ => None,
        };
        let body = ErrorBody {
            code: self.error_code(),
            message: self.client_message(),
            reason,
        };
        (self.http_status_code(), Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

//! Error types for StudyVault services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    InvalidFormat,
    PayloadTooLarge,
    ConversionRequired,

    // Authentication errors (2xxx)
    AuthRequired,
    InvalidToken,
    ExpiredToken,
    DomainRestricted,
    ProfileRequired,

    // Authorization errors (3xxx)
    Forbidden,
    ScopeViolation,

    // Resource errors (4xxx)
    NotFound,
    ResourceNotFound,
    ProfileNotFound,

    // Conflict errors (5xxx)
    InvalidTransition,

    // Rate limiting (6xxx)
    RateLimited,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,
    StoreError,

    // External service errors (8xxx)
    UpstreamError,
    UploadError,
    InferenceError,
    ConversionError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,
            ErrorCode::PayloadTooLarge => 1004,
            ErrorCode::ConversionRequired => 1005,

            // Auth (2xxx)
            ErrorCode::AuthRequired => 2001,
            ErrorCode::InvalidToken => 2002,
            ErrorCode::ExpiredToken => 2003,
            ErrorCode::DomainRestricted => 2004,
            ErrorCode::ProfileRequired => 2005,

            // Authz (3xxx)
            ErrorCode::Forbidden => 3001,
            ErrorCode::ScopeViolation => 3002,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::ResourceNotFound => 4002,
            ErrorCode::ProfileNotFound => 4003,

            // Conflicts (5xxx)
            ErrorCode::InvalidTransition => 5001,

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,
            ErrorCode::StoreError => 7003,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::UploadError => 8002,
            ErrorCode::InferenceError => 8003,
            ErrorCode::ConversionError => 8004,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("Payload too large: {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("Images must be converted to a PDF before submitting")]
    ConversionRequired,

    // Authentication errors
    #[error("Please log in to {action}")]
    AuthRequired { action: String },

    #[error("Invalid session token")]
    InvalidToken,

    #[error("Token expired")]
    ExpiredToken,

    #[error("Only @{domain} emails are allowed")]
    DomainRestricted { domain: String },

    #[error("Complete your profile before continuing")]
    ProfileRequired,

    // Authorization errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Your admin scope is limited to {permitted}; this resource belongs to {department}")]
    ScopeViolation {
        permitted: String,
        department: String,
    },

    #[error("You can only review {permitted} submissions, not {requested}")]
    QueueScopeViolation { permitted: String, requested: String },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Resource not found: {id}")]
    ResourceNotFound { id: String },

    #[error("Profile not found: {uid}")]
    ProfileNotFound { uid: String },

    // Conflict errors
    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Store error: {message}")]
    Store { message: String },

    // External service errors
    #[error("Upload failed: {message}")]
    Upload { message: String },

    #[error("Assistant error: {message}")]
    Inference { message: String },

    #[error("Conversion failed: {message}")]
    Conversion { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::PayloadTooLarge { .. } => ErrorCode::PayloadTooLarge,
            AppError::ConversionRequired => ErrorCode::ConversionRequired,
            AppError::AuthRequired { .. } => ErrorCode::AuthRequired,
            AppError::InvalidToken => ErrorCode::InvalidToken,
            AppError::ExpiredToken => ErrorCode::ExpiredToken,
            AppError::DomainRestricted { .. } => ErrorCode::DomainRestricted,
            AppError::ProfileRequired => ErrorCode::ProfileRequired,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::ScopeViolation { .. } | AppError::QueueScopeViolation { .. } => {
                ErrorCode::ScopeViolation
            }
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::ResourceNotFound { .. } => ErrorCode::ResourceNotFound,
            AppError::ProfileNotFound { .. } => ErrorCode::ProfileNotFound,
            AppError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Store { .. } => ErrorCode::StoreError,
            AppError::Upload { .. } => ErrorCode::UploadError,
            AppError::Inference { .. } => ErrorCode::InferenceError,
            AppError::Conversion { .. } => ErrorCode::ConversionError,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. }
            | AppError::ConversionRequired => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            AppError::AuthRequired { .. }
            | AppError::InvalidToken
            | AppError::ExpiredToken
            | AppError::DomainRestricted { .. } => StatusCode::UNAUTHORIZED,

            // 403 Forbidden
            AppError::Forbidden { .. }
            | AppError::ScopeViolation { .. }
            | AppError::QueueScopeViolation { .. } => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::NotFound { .. }
            | AppError::ResourceNotFound { .. }
            | AppError::ProfileNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::InvalidTransition { .. } => StatusCode::CONFLICT,

            // 413 Payload Too Large
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            // 422 Unprocessable Entity
            AppError::Conversion { .. } => StatusCode::UNPROCESSABLE_ENTITY,

            // 428 Precondition Required
            AppError::ProfileRequired => StatusCode::PRECONDITION_REQUIRED,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Store { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Upload { .. } | AppError::Inference { .. } | AppError::HttpClient(_) => {
                StatusCode::BAD_GATEWAY
            }

            // 503 Service Unavailable
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Shorthand for a store-level failure
    pub fn store(message: impl Into<String>) -> Self {
        AppError::Store {
            message: message.into(),
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseConnection {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}

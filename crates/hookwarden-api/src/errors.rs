//! Error types for the HTTP service

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use hookwarden_core::{
    signature::SignatureFailure, ErrorKind, EventId, LedgerError, ValidationError, WebhookSource,
};
use tracing::{error, warn};

/// Webhook endpoint errors with HTTP status code mapping
///
/// Providers only ever see the status code and a fixed reason phrase. The
/// detail in each variant is for server-side logs.
///
/// | Variant | Status |
/// |---------|--------|
/// | `ProviderNotFound` | 404 |
/// | `UnsupportedMediaType` | 415 |
/// | `PayloadTooLarge` | 413 |
/// | `RateLimitExceeded` | 429 + `Retry-After` |
/// | `InvalidSignature` | 401 |
/// | `InvalidPayload` | 400 |
/// | `ProcessingFailed`, `Ledger` | 500 |
#[derive(Debug, thiserror::Error)]
pub enum WebhookHandlerError {
    /// Unknown or disabled provider in the URL path
    #[error("Webhook provider not found: {provider}")]
    ProviderNotFound { provider: String },

    /// Body is not declared as JSON
    #[error("Unsupported content type: {content_type}")]
    UnsupportedMediaType { content_type: String },

    /// Body exceeds the provider's cap
    #[error("Payload too large: {size} bytes (max: {max_size} bytes)")]
    PayloadTooLarge { size: usize, max_size: usize },

    /// Too many requests for one rate-limit key
    #[error("Rate limit exceeded. Retry after {retry_after_seconds}s")]
    RateLimitExceeded { retry_after_seconds: u64 },

    /// Signature missing, malformed, wrong, or stale
    #[error("Signature rejected: {0}")]
    InvalidSignature(SignatureFailure),

    /// Authenticated body that cannot be turned into an event
    #[error("Invalid payload: {0}")]
    InvalidPayload(#[from] ValidationError),

    /// Handler failed after exhausting retries
    #[error("Processing failed for event {event_id}: {kind}")]
    ProcessingFailed { event_id: EventId, kind: ErrorKind },

    /// Ledger could not record or update the event
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

impl WebhookHandlerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ProviderNotFound { .. } => StatusCode::NOT_FOUND,
            Self::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            Self::ProcessingFailed { .. } | Self::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookHandlerError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        match &self {
            Self::ProcessingFailed { .. } | Self::Ledger(_) => {
                error!(error = %self, status = status.as_u16(), "Webhook request failed");
            }
            _ => {
                warn!(error = %self, status = status.as_u16(), "Webhook request rejected");
            }
        }

        let body = status.canonical_reason().unwrap_or("Error");
        let mut response = (status, body).into_response();

        if let Self::RateLimitExceeded {
            retry_after_seconds,
        } = self
        {
            if let Ok(value) = retry_after_seconds.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// Errors from the operator-facing admin routes.
///
/// Unlike webhook errors these carry their message in a JSON body.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Invalid event id: {value}")]
    InvalidEventId { value: String },

    #[error("Event not found: {event_id}")]
    EventNotFound { event_id: EventId },

    #[error("Circuit breaker not found: {name}")]
    CircuitNotFound { name: String },

    #[error("Event {event_id} reached the retry limit ({max_retries})")]
    RetryLimitReached { event_id: EventId, max_retries: u32 },

    #[error("Event {event_id} has already been processed")]
    AlreadyProcessed { event_id: EventId },

    #[error("Ledger error: {0}")]
    Ledger(LedgerError),
}

impl From<LedgerError> for AdminError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::EventNotFound { event_id } => Self::EventNotFound { event_id },
            LedgerError::MaxRetriesExceeded {
                event_id,
                max_retries,
                ..
            } => Self::RetryLimitReached {
                event_id,
                max_retries,
            },
            LedgerError::AlreadyProcessed { event_id } => Self::AlreadyProcessed { event_id },
            other => Self::Ledger(other),
        }
    }
}

impl AdminError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidEventId { .. } => StatusCode::BAD_REQUEST,
            Self::EventNotFound { .. } | Self::CircuitNotFound { .. } => StatusCode::NOT_FOUND,
            Self::RetryLimitReached { .. } | Self::AlreadyProcessed { .. } => {
                StatusCode::CONFLICT
            }
            Self::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "Admin request failed");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        (status, Json(body)).into_response()
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Invalid configuration for provider '{provider}': {message}")]
    Provider { provider: String, message: String },

    #[error("Failed to load configuration: {message}")]
    Load { message: String },
}

/// Shorthand used by handlers to reject unknown provider segments.
pub(crate) fn parse_provider(value: &str) -> Result<WebhookSource, WebhookHandlerError> {
    value
        .parse()
        .map_err(|_| WebhookHandlerError::ProviderNotFound {
            provider: value.to_string(),
        })
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

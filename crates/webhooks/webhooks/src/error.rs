//! Webhook error types.

use thiserror::Error;

/// Result type for webhook operations.
pub type WebhookResult<T> = Result<T, WebhookError>;

/// Error type for webhook operations.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// A subscription failed validation (bad URL, empty events, missing secret, ...).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Subscription not found.
    #[error("Subscription not found: {0}")]
    NotFound(String),

    /// A concurrent writer changed the record first.
    #[error("Version conflict on subscription {id}: expected {expected}, found {found}")]
    Conflict { id: String, expected: u64, found: u64 },

    /// Transport-level delivery failure.
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// Invalid signature.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signature expired.
    #[error("Signature expired")]
    ExpiredSignature,

    /// Invalid payload.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WebhookError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Returns an HTTP status code appropriate for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::InvalidPayload(_) => 400,
            Self::InvalidSignature | Self::ExpiredSignature => 401,
            Self::NotFound(_) => 404,
            Self::Conflict { .. } => 409,
            Self::Delivery(_) => 502,
            _ => 500,
        }
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::InvalidPayload(err.to_string())
    }
}

#[cfg(feature = "http-client")]
impl From<reqwest::Error> for WebhookError {
    fn from(err: reqwest::Error) -> Self {
        WebhookError::Delivery(err.to_string())
    }
}

//! Webhook receiver for verifying incoming deliveries on the subscriber side.

use chrono::{DateTime, Utc};

use crate::delivery::DeliveryPayload;
use crate::error::{WebhookError, WebhookResult};
use crate::signature::WebhookSigner;

/// Verifies deliveries signed with a shared secret.
pub struct WebhookReceiver {
    signer: WebhookSigner,
    /// Maximum age of the event timestamp, in seconds.
    tolerance_secs: Option<i64>,
}

impl WebhookReceiver {
    /// Creates a new webhook receiver. Timestamps are not checked unless a
    /// tolerance is set, since retried deliveries keep the timestamp of the first attempt.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            signer: WebhookSigner::new(secret),
            tolerance_secs: None,
        }
    }

    /// Rejects deliveries whose timestamp is further than `tolerance_secs` from now.
    pub fn with_tolerance(mut self, tolerance_secs: i64) -> Self {
        self.tolerance_secs = Some(tolerance_secs);
        self
    }

    /// Parses a delivery body and checks its signature.
    pub fn verify(&self, body: &[u8]) -> WebhookResult<DeliveryPayload> {
        self.verify_at(body, Utc::now())
    }

    /// Like [`verify`](Self::verify), also requiring the `X-Webhook-Signature`
    /// header to match the body.
    pub fn verify_with_header(&self, header: &str, body: &[u8]) -> WebhookResult<DeliveryPayload> {
        let payload = self.verify(body)?;
        if header != payload.signature {
            return Err(WebhookError::InvalidSignature);
        }
        Ok(payload)
    }

    /// Verifies a delivery body against the clock `now`.
    pub fn verify_at(&self, body: &[u8], now: DateTime<Utc>) -> WebhookResult<DeliveryPayload> {
        let payload: DeliveryPayload =
            serde_json::from_slice(body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;

        if !self.signer.verify_data(&payload.signature, &payload.data) {
            return Err(WebhookError::InvalidSignature);
        }

        if let Some(tolerance) = self.tolerance_secs {
            if (now - payload.timestamp).num_seconds().abs() > tolerance {
                return Err(WebhookError::ExpiredSignature);
            }
        }

        Ok(payload)
    }
}

//! Challenge/response handshake proving a subscriber controls its URL.
//!
//! The engine POSTs a [`VerificationChallenge`] to the subscription URL. The
//! subscriber checks the signature with the shared secret and answers 2xx with
//! `{"challenge": <same value>}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signature::WebhookSigner;

/// Challenge sent to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationChallenge {
    /// Random token the subscriber must echo.
    pub challenge: String,
    /// Unix timestamp, seconds.
    pub timestamp: i64,
    /// Hex HMAC-SHA256 of `"{timestamp}.{challenge}"`.
    pub signature: String,
}

impl VerificationChallenge {
    /// Creates a fresh signed challenge.
    pub fn new(secret: &str, at: DateTime<Utc>) -> Self {
        let challenge = uuid::Uuid::new_v4().simple().to_string();
        let timestamp = at.timestamp();
        let signature = WebhookSigner::new(secret).sign_challenge(timestamp, &challenge);
        Self {
            challenge,
            timestamp,
            signature,
        }
    }

    /// Checks the signature; used on the subscriber side.
    pub fn is_signed_by(&self, secret: &str) -> bool {
        let expected = format!("{}.{}", self.timestamp, self.challenge);
        WebhookSigner::new(secret).verify(&self.signature, expected.as_bytes())
    }
}

/// Subscriber's answer to a challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResponse {
    pub challenge: String,
}

#[cfg(feature = "http-client")]
pub use client::Verifier;

#[cfg(feature = "http-client")]
mod client {
    use std::time::Duration;

    use super::*;
    use crate::error::{WebhookError, WebhookResult};
    use crate::registry::SubscriptionRegistry;
    use crate::subscription::Subscription;

    /// Runs verification handshakes and stamps `verified_at` on success.
    #[derive(Clone)]
    pub struct Verifier {
        client: reqwest::Client,
        registry: SubscriptionRegistry,
    }

    impl Verifier {
        /// Creates a verifier.
        pub fn new(registry: SubscriptionRegistry, timeout: Duration, user_agent: &str) -> WebhookResult<Self> {
            let client = reqwest::Client::builder()
                .user_agent(user_agent)
                .timeout(timeout)
                .build()
                .map_err(|e| WebhookError::Config(e.to_string()))?;
            Ok(Self { client, registry })
        }

        /// Runs the handshake against a subscription's URL.
        pub async fn verify(&self, id: &str) -> WebhookResult<Subscription> {
            let subscription = self.registry.get(id).await?;
            let challenge = VerificationChallenge::new(&subscription.secret, Utc::now());

            let response = self
                .client
                .post(&subscription.url)
                .header("X-Webhook-Event", "verification")
                .json(&challenge)
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                tracing::warn!(subscription_id = %id, status = status.as_u16(), "Webhook verification rejected");
                return Err(WebhookError::Delivery(format!(
                    "verification failed: HTTP {}",
                    status.as_u16()
                )));
            }

            let answer: VerificationResponse = response
                .json()
                .await
                .map_err(|e| WebhookError::Delivery(format!("invalid verification response: {e}")))?;
            if answer.challenge != challenge.challenge {
                tracing::warn!(subscription_id = %id, "Webhook verification challenge mismatch");
                return Err(WebhookError::Delivery("verification challenge mismatch".to_string()));
            }

            let verified = self.registry.mark_verified(id, Utc::now()).await?;
            tracing::info!(subscription_id = %id, "Webhook subscription verified");
            Ok(verified)
        }
    }
}

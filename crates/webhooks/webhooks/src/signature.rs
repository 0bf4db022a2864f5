//! HMAC signature generation and verification.

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies webhook payloads with a subscription's shared secret.
pub struct WebhookSigner {
    secret: String,
}

impl WebhookSigner {
    /// Creates a new signer with the given secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Returns the hex HMAC-SHA256 of raw bytes.
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC can take key of any size");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Signs the `data` object of a delivery.
    ///
    /// The signed bytes are the compact JSON encoding of `data`, exactly as
    /// it appears in the delivered body.
    pub fn sign_data(&self, data: &Map<String, Value>) -> String {
        self.sign(&canonical_data(data))
    }

    /// Signs a verification challenge: `"{timestamp}.{challenge}"`.
    pub fn sign_challenge(&self, timestamp: i64, challenge: &str) -> String {
        self.sign(format!("{}.{}", timestamp, challenge).as_bytes())
    }

    /// Verifies a signature against raw bytes.
    pub fn verify(&self, signature: &str, payload: &[u8]) -> bool {
        constant_time_compare(&self.sign(payload), signature)
    }

    /// Verifies the signature of a delivery's `data` object.
    pub fn verify_data(&self, signature: &str, data: &Map<String, Value>) -> bool {
        self.verify(signature, &canonical_data(data))
    }
}

/// Compact JSON bytes of a data object.
pub(crate) fn canonical_data(data: &Map<String, Value>) -> Vec<u8> {
    serde_json::to_vec(data).unwrap_or_default()
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

//! Stripe webhook signature verification.
//!
//! Stripe signs every delivery with HMAC-SHA256 over `"<timestamp>.<raw body>"`
//! and sends the result in the `stripe-signature` header:
//!
//! ```text
//! stripe-signature: t=1700000000,v1=5257a869e7ec...,v0=6ffbb59b2300...
//! ```
//!
//! Reference: https://docs.stripe.com/webhooks#verify-manually

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::warn;

use crate::events::InboundEvent;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature token.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Default maximum age of a signed timestamp.
pub const DEFAULT_TOLERANCE_SECS: u64 = 300;

const EXPECTED_SCHEME: &str = "v1";

/// Why a delivery failed authenticity checks.
///
/// The messages are returned to the caller verbatim in the 400 response.
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("No stripe-signature header value was provided.")]
    MissingHeader,

    #[error("Unable to extract timestamp and signatures from header")]
    MalformedHeader,

    #[error("Timestamp outside the tolerance zone")]
    TimestampOutsideTolerance { timestamp: i64, now: i64 },

    #[error(
        "No signatures found matching the expected signature for payload. \
         Are you passing the raw request body you received from Stripe?"
    )]
    NoMatchingSignature,

    #[error("Webhook secret cannot be used as a signing key")]
    InvalidSecret,

    #[error("Invalid event payload: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

/// Parsed components of a `stripe-signature` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    /// Every decodable `v1` signature. Stripe sends several while a secret
    /// is being rolled.
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    /// Parse `t=<timestamp>,v1=<hex>[,v1=<hex>...]`.
    ///
    /// Unknown schemes are ignored. Signatures that are not valid hex can
    /// never match, so they are dropped here.
    pub fn parse(header: &str) -> Result<Self, SignatureError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };

            match key {
                "t" => {
                    timestamp = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| SignatureError::MalformedHeader)?,
                    );
                }
                EXPECTED_SCHEME => {
                    if let Ok(sig) = hex::decode(value) {
                        signatures.push(sig);
                    }
                }
                _ => {}
            }
        }

        match timestamp {
            Some(timestamp) if !signatures.is_empty() => Ok(SignatureHeader {
                timestamp,
                signatures,
            }),
            _ => Err(SignatureError::MalformedHeader),
        }
    }
}

/// Verifies deliveries against the shared webhook secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance_secs: u64,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"<redacted>")
            .field("tolerance_secs", &self.tolerance_secs)
            .finish()
    }
}

impl WebhookVerifier {
    /// Create a verifier. A tolerance of zero disables the timestamp check.
    pub fn new(secret: impl Into<String>, tolerance_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Verify `payload` against `header` and parse the event it carries.
    pub fn construct_event(
        &self,
        payload: &[u8],
        header: Option<&str>,
    ) -> Result<InboundEvent, SignatureError> {
        self.construct_event_at(payload, header, unix_now())
    }

    /// Same as [`construct_event`](Self::construct_event) with an explicit clock.
    pub fn construct_event_at(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: i64,
    ) -> Result<InboundEvent, SignatureError> {
        self.verify_at(payload, header, now)?;
        Ok(serde_json::from_slice(payload)?)
    }

    /// Check the signature only.
    pub fn verify_at(
        &self,
        payload: &[u8],
        header: Option<&str>,
        now: i64,
    ) -> Result<(), SignatureError> {
        let header = header
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or(SignatureError::MissingHeader)?;

        let parsed = SignatureHeader::parse(header)?;

        let expected = compute_signature(&self.secret, parsed.timestamp, payload)?;

        // Every candidate is compared so the work done does not depend on
        // which one matched.
        let matched = parsed
            .signatures
            .iter()
            .fold(0u8, |acc, sig| acc | expected.as_slice().ct_eq(sig.as_slice()).unwrap_u8());

        if matched == 0 {
            warn!(
                candidates = parsed.signatures.len(),
                "webhook_signature_mismatch"
            );
            return Err(SignatureError::NoMatchingSignature);
        }

        // Only stale signatures are refused; a clock running behind the
        // provider's must not reject fresh deliveries.
        let age = now.saturating_sub(parsed.timestamp);
        if self.tolerance_secs > 0 && age > 0 && age as u64 > self.tolerance_secs {
            warn!(
                webhook_time = parsed.timestamp,
                current_time = now,
                age_seconds = age,
                max_age_seconds = self.tolerance_secs,
                "webhook_signature_stale"
            );
            return Err(SignatureError::TimestampOutsideTolerance {
                timestamp: parsed.timestamp,
                now,
            });
        }

        Ok(())
    }
}

/// Build a valid `stripe-signature` header for `payload`.
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, SignatureError> {
    let signature = compute_signature(secret, timestamp, payload)?;
    Ok(format!("t={},{}={}", timestamp, EXPECTED_SCHEME, hex::encode(signature)))
}

/// HMAC-SHA256(secret, "<timestamp>." ++ payload), over the raw bytes.
fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSecret)?;

    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    Ok(mac.finalize().into_bytes().to_vec())
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

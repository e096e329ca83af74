//! Web server module for receiving provider webhooks.
//!
//! This module provides:
//! - Raw body buffering (signatures are computed over the exact bytes)
//! - Stripe signature verification
//! - The HTTP handlers and router

pub mod body;
pub mod handlers;
pub mod signature;

pub use body::{buffer, read_body, BodyChunk, StreamReadError};
pub use handlers::{
    health, method_not_allowed, router, stripe_webhook, AppState, HealthResponse,
    MetricsSnapshot, WebhookMetrics, WebhookResponse, WEBHOOK_PATH,
};
pub use signature::{sign, SignatureError, SignatureHeader, WebhookVerifier, SIGNATURE_HEADER};

//! HTTP endpoint handlers.
//!
//! The webhook handler only moves bytes in and maps the dispatcher's outcome
//! to a response:
//! 1. Buffer the raw body
//! 2. Hand body and signature header to the dispatcher
//! 3. Map the outcome to a status code and payload

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigError};
use crate::dispatch::{Ack, EventDispatcher, WebhookOutcome};
use crate::store::SubscriptionStore;
use crate::web::body::{read_body, StreamReadError};
use crate::web::signature::{SignatureError, WebhookVerifier, SIGNATURE_HEADER};

/// Path the provider delivers events to.
pub const WEBHOOK_PATH: &str = "/api/webhooks";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: EventDispatcher,
    pub metrics: Arc<WebhookMetrics>,
}

impl AppState {
    /// Wire the dispatcher from `config`. Fails when no webhook secret is set.
    pub fn new(config: Config, store: Arc<dyn SubscriptionStore>) -> Result<Self, ConfigError> {
        let secret = config
            .stripe_webhook_secret
            .clone()
            .ok_or(ConfigError::MissingRequired("STRIPE_WEBHOOK_SECRET"))?;

        let verifier = WebhookVerifier::new(secret, config.signature_tolerance_secs);

        Ok(Self {
            config: Arc::new(config),
            dispatcher: EventDispatcher::new(verifier, store),
            metrics: Arc::new(WebhookMetrics::default()),
        })
    }
}

/// Per-process delivery counters.
#[derive(Debug, Default)]
pub struct WebhookMetrics {
    acked: AtomicU64,
    ignored: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl WebhookMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            acked: self.acked.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub acked: u64,
    pub ignored: u64,
    pub failed: u64,
    pub rejected: u64,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            WEBHOOK_PATH,
            post(stripe_webhook).fallback(method_not_allowed),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub deliveries: MetricsSnapshot,
}

/// Health check endpoint.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        deliveries: state.metrics.snapshot(),
    })
}

// =============================================================================
// Stripe Webhook
// =============================================================================

/// Acknowledgement payload. Both variants are sent with 200.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum WebhookResponse {
    Received { received: bool },
    Failed { error: &'static str },
}

impl WebhookResponse {
    pub fn received() -> Self {
        WebhookResponse::Received { received: true }
    }

    pub fn failed() -> Self {
        WebhookResponse::Failed {
            error: "Webhook handler failed.",
        }
    }
}

/// Stripe webhook endpoint.
///
/// Takes the body as a raw stream: any parsing extractor would change the
/// bytes the signature was computed over.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let signature = match headers.get(SIGNATURE_HEADER).map(|v| v.to_str()) {
        None => None,
        Some(Ok(value)) => Some(value),
        // Present but not visible ASCII: never a valid signature.
        Some(Err(_)) => return reject(&state.metrics, SignatureError::MalformedHeader),
    };

    let raw = match read_body(body, state.config.max_body_bytes).await {
        Ok(raw) => raw,
        Err(e) => {
            error!(error = %e, "webhook_body_read_failed");
            let status = match e {
                StreamReadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                StreamReadError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            return (status, e.to_string()).into_response();
        }
    };

    info!(
        body_length = raw.len(),
        has_signature = signature.is_some(),
        "webhook_received"
    );

    let metrics = &state.metrics;

    match state.dispatcher.handle(&raw, signature).await {
        WebhookOutcome::Rejected(e) => reject(metrics, e),
        WebhookOutcome::Acked(ack) => {
            match &ack {
                Ack::Handled { .. } => metrics.acked.fetch_add(1, Ordering::Relaxed),
                Ack::Ignored { .. } => metrics.ignored.fetch_add(1, Ordering::Relaxed),
            };
            (StatusCode::OK, Json(WebhookResponse::received())).into_response()
        }
        WebhookOutcome::AckedWithInternalFailure {
            event_id,
            event_type,
            error,
        } => {
            // Acked on purpose: a 4xx/5xx here would make the provider redeliver.
            metrics.failed.fetch_add(1, Ordering::Relaxed);
            error!(
                event_id = %event_id,
                event_type = %event_type,
                error = %error,
                "webhook_handler_failed"
            );
            (StatusCode::OK, Json(WebhookResponse::failed())).into_response()
        }
    }
}

/// 400 with the verification message; the provider may redeliver.
fn reject(metrics: &WebhookMetrics, e: SignatureError) -> Response {
    metrics.rejected.fetch_add(1, Ordering::Relaxed);
    warn!(error = %e, "webhook_signature_invalid");
    (StatusCode::BAD_REQUEST, format!("Webhook error: {}", e)).into_response()
}

/// Any method other than POST on the webhook path.
pub async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        "Method not allowed",
    )
}

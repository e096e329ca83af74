//! Webhook event dispatch.
//!
//! Turns one raw delivery into one outcome:
//!
//! ```text
//! Received → verified ─┬→ irrelevant type ───────────────→ Acked
//!          │           └→ relevant type → upsert ─┬──────→ Acked
//!          │                                      └──────→ AckedWithInternalFailure
//!          └→ signature failure ─────────────────────────→ Rejected
//! ```
//!
//! Only `Rejected` is reported to the provider as an error. Dispatch failures
//! are acknowledged so the provider does not redeliver, and are surfaced to
//! operators through logs and counters instead.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::events::{
    is_relevant, CheckoutSessionObject, Expandable, InboundEvent, RelevantEvent,
    SubscriptionObject, UnhandledEventError,
};
use crate::store::{StoreError, SubscriptionStore};
use crate::web::signature::{unix_now, SignatureError, WebhookVerifier};

/// Failure while applying a verified, relevant event.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    UnhandledEvent(#[from] UnhandledEventError),

    #[error("malformed {event_type} payload: {source}")]
    MalformedPayload {
        event_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{event_type} payload is missing {field}")]
    MissingField {
        event_type: &'static str,
        field: &'static str,
    },

    #[error(transparent)]
    Persistence(#[from] StoreError),
}

/// A delivery that was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// A relevant event was applied to the store.
    Handled {
        event_id: String,
        event_type: RelevantEvent,
        subscription_id: String,
        customer_id: String,
        is_active: bool,
    },
    /// The event type is outside the allow-set; nothing was written.
    Ignored { event_id: String, event_type: String },
}

/// Result of handling one delivery.
#[derive(Debug)]
pub enum WebhookOutcome {
    /// Authenticity check failed. Nothing was dispatched.
    Rejected(SignatureError),
    Acked(Ack),
    /// The event was genuine but applying it failed.
    AckedWithInternalFailure {
        event_id: String,
        event_type: String,
        error: DispatchError,
    },
}

/// Verifies deliveries and applies subscription state transitions.
#[derive(Clone)]
pub struct EventDispatcher {
    verifier: WebhookVerifier,
    store: Arc<dyn SubscriptionStore>,
}

impl EventDispatcher {
    pub fn new(verifier: WebhookVerifier, store: Arc<dyn SubscriptionStore>) -> Self {
        Self { verifier, store }
    }

    /// Handle one delivery: `raw_body` must be the untouched request bytes.
    pub async fn handle(&self, raw_body: &[u8], signature_header: Option<&str>) -> WebhookOutcome {
        self.handle_at(raw_body, signature_header, unix_now()).await
    }

    /// Same as [`handle`](Self::handle) with an explicit clock for the
    /// timestamp tolerance check.
    pub async fn handle_at(
        &self,
        raw_body: &[u8],
        signature_header: Option<&str>,
        now: i64,
    ) -> WebhookOutcome {
        let event = match self.verifier.construct_event_at(raw_body, signature_header, now) {
            Ok(event) => event,
            Err(e) => return WebhookOutcome::Rejected(e),
        };

        info!(
            event_id = %event.id,
            event_type = %event.event_type,
            livemode = event.livemode,
            "webhook_event_verified"
        );

        if !is_relevant(&event.event_type) {
            info!(
                event_id = %event.id,
                event_type = %event.event_type,
                "webhook_event_ignored"
            );
            return WebhookOutcome::Acked(Ack::Ignored {
                event_id: event.id,
                event_type: event.event_type,
            });
        }

        match self.dispatch(&event).await {
            Ok(ack) => WebhookOutcome::Acked(ack),
            Err(error) => WebhookOutcome::AckedWithInternalFailure {
                event_id: event.id,
                event_type: event.event_type,
                error,
            },
        }
    }

    async fn dispatch(&self, event: &InboundEvent) -> Result<Ack, DispatchError> {
        let kind = RelevantEvent::try_from(event.event_type.as_str())?;

        // TODO: `updated` can leave a subscription active (plan change, renewal);
        // map it from the subscription status once product confirms the intent.
        let (subscription_id, customer_id, is_active) = match kind {
            RelevantEvent::SubscriptionUpdated | RelevantEvent::SubscriptionDeleted => {
                let subscription: SubscriptionObject = parse_object(event, kind)?;
                let customer = required(subscription.customer, kind, "customer")?;
                let subscription_id = non_empty(subscription.id, kind, "id")?;
                (subscription_id, customer, false)
            }
            RelevantEvent::CheckoutSessionCompleted => {
                let session: CheckoutSessionObject = parse_object(event, kind)?;
                let subscription_id = required(session.subscription, kind, "subscription")?;
                let customer = required(session.customer, kind, "customer")?;
                (subscription_id, customer, true)
            }
        };

        self.store
            .save_subscription(&subscription_id, &customer_id, is_active)
            .await?;

        info!(
            event_id = %event.id,
            event_type = kind.as_str(),
            subscription_id = %subscription_id,
            customer_id = %customer_id,
            is_active = is_active,
            "webhook_subscription_saved"
        );

        Ok(Ack::Handled {
            event_id: event.id.clone(),
            event_type: kind,
            subscription_id,
            customer_id,
            is_active,
        })
    }
}

fn parse_object<T: serde::de::DeserializeOwned>(
    event: &InboundEvent,
    kind: RelevantEvent,
) -> Result<T, DispatchError> {
    event
        .object()
        .map_err(|source| DispatchError::MalformedPayload {
            event_type: kind.as_str(),
            source,
        })
}

fn required(
    value: Option<Expandable>,
    kind: RelevantEvent,
    field: &'static str,
) -> Result<String, DispatchError> {
    match value {
        Some(v) => non_empty(v.id().to_string(), kind, field),
        None => Err(DispatchError::MissingField {
            event_type: kind.as_str(),
            field,
        }),
    }
}

fn non_empty(value: String, kind: RelevantEvent, field: &'static str) -> Result<String, DispatchError> {
    if value.is_empty() {
        return Err(DispatchError::MissingField {
            event_type: kind.as_str(),
            field,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::store::{InMemoryStore, SubscriptionRecord};
    use crate::web::signature::sign;

    const SECRET: &str = "whsec_dispatch_test";
    const NOW: i64 = 1_700_000_000;

    struct FailingStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SubscriptionStore for FailingStore {
        async fn save_subscription(&self, _: &str, _: &str, _: bool) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn dispatcher(store: Arc<dyn SubscriptionStore>) -> EventDispatcher {
        EventDispatcher::new(WebhookVerifier::new(SECRET, 300), store)
    }

    fn event(event_type: &str, object: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_test",
            "object": "event",
            "type": event_type,
            "created": NOW,
            "livemode": false,
            "data": { "object": object }
        }))
        .unwrap()
    }

    async fn deliver(dispatcher: &EventDispatcher, body: &[u8]) -> WebhookOutcome {
        let header = sign(SECRET, NOW, body).unwrap();
        dispatcher.handle_at(body, Some(&header), NOW).await
    }

    #[tokio::test]
    async fn test_checkout_completed_activates() {
        let store = InMemoryStore::new();
        let dispatcher = dispatcher(Arc::new(store.clone()));
        let body = event(
            "checkout.session.completed",
            json!({"id": "cs_1", "object": "checkout.session", "subscription": "sub_1", "customer": "cus_1"}),
        );

        let outcome = deliver(&dispatcher, &body).await;

        assert!(matches!(
            outcome,
            WebhookOutcome::Acked(Ack::Handled { is_active: true, .. })
        ));
        assert_eq!(
            store.calls().await,
            vec![SubscriptionRecord::new("sub_1", "cus_1", true)]
        );
    }

    #[tokio::test]
    async fn test_subscription_updated_deactivates() {
        let store = InMemoryStore::new();
        let dispatcher = dispatcher(Arc::new(store.clone()));
        let body = event(
            "customer.subscription.updated",
            json!({"id": "sub_2", "object": "subscription", "customer": "cus_2", "status": "active"}),
        );

        deliver(&dispatcher, &body).await;

        assert_eq!(
            store.calls().await,
            vec![SubscriptionRecord::new("sub_2", "cus_2", false)]
        );
    }

    #[tokio::test]
    async fn test_updated_then_deleted_matches_either_alone() {
        let store = InMemoryStore::new();
        let dispatcher = dispatcher(Arc::new(store.clone()));
        let object = json!({"id": "sub_2", "customer": "cus_2"});

        deliver(&dispatcher, &event("customer.subscription.updated", object.clone())).await;
        let after_updated = store.get("sub_2").await;
        deliver(&dispatcher, &event("customer.subscription.deleted", object)).await;

        assert_eq!(after_updated, store.get("sub_2").await);
        assert_eq!(
            store.get("sub_2").await,
            Some(SubscriptionRecord::new("sub_2", "cus_2", false))
        );
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let store = InMemoryStore::new();
        let dispatcher = dispatcher(Arc::new(store.clone()));
        let body = event(
            "checkout.session.completed",
            json!({"id": "cs_1", "subscription": "sub_1", "customer": "cus_1"}),
        );

        deliver(&dispatcher, &body).await;
        let first = store.get("sub_1").await;
        deliver(&dispatcher, &body).await;

        assert_eq!(store.calls().await.len(), 2);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("sub_1").await, first);
    }

    #[tokio::test]
    async fn test_irrelevant_event_never_touches_store() {
        let store = InMemoryStore::new();
        let dispatcher = dispatcher(Arc::new(store.clone()));

        for event_type in ["invoice.paid", "customer.created", "customer.subscription.created"] {
            let outcome = deliver(&dispatcher, &event(event_type, json!({"id": "x"}))).await;
            match outcome {
                WebhookOutcome::Acked(Ack::Ignored { event_type: seen, .. }) => {
                    assert_eq!(seen, event_type)
                }
                other => panic!("Expected Ignored, got {:?}", other),
            }
        }

        assert!(store.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_irrelevant_event_with_sparse_envelope_is_ignored() {
        let store = InMemoryStore::new();
        let dispatcher = dispatcher(Arc::new(store.clone()));

        for body in [
            &br#"{"type":"invoice.paid","data":{"object":{}}}"#[..],
            &br#"{"id":"evt_1","type":"invoice.paid"}"#[..],
        ] {
            let outcome = deliver(&dispatcher, body).await;
            assert!(
                matches!(outcome, WebhookOutcome::Acked(Ack::Ignored { .. })),
                "unexpected outcome {:?}",
                outcome
            );
        }

        assert!(store.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_relevant_event_without_data_is_acked_with_failure() {
        let store = InMemoryStore::new();
        let dispatcher = dispatcher(Arc::new(store.clone()));
        let body = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;

        let outcome = deliver(&dispatcher, body).await;

        assert!(matches!(
            outcome,
            WebhookOutcome::AckedWithInternalFailure {
                error: DispatchError::MalformedPayload { .. },
                ..
            }
        ));
        assert!(store.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_expanded_customer_object() {
        let store = InMemoryStore::new();
        let dispatcher = dispatcher(Arc::new(store.clone()));
        let body = event(
            "customer.subscription.deleted",
            json!({"id": "sub_3", "customer": {"id": "cus_3", "object": "customer"}}),
        );

        deliver(&dispatcher, &body).await;

        assert_eq!(
            store.get("sub_3").await,
            Some(SubscriptionRecord::new("sub_3", "cus_3", false))
        );
    }

    #[tokio::test]
    async fn test_persistence_failure_is_acked_with_failure() {
        let store = Arc::new(FailingStore {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = dispatcher(store.clone());
        let body = event(
            "checkout.session.completed",
            json!({"id": "cs_1", "subscription": "sub_1", "customer": "cus_1"}),
        );

        let outcome = deliver(&dispatcher, &body).await;

        assert!(matches!(
            outcome,
            WebhookOutcome::AckedWithInternalFailure {
                error: DispatchError::Persistence(_),
                ..
            }
        ));
        // No retry.
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_subscription_on_session() {
        let store = InMemoryStore::new();
        let dispatcher = dispatcher(Arc::new(store.clone()));
        let body = event(
            "checkout.session.completed",
            json!({"id": "cs_1", "subscription": null, "customer": "cus_1"}),
        );

        let outcome = deliver(&dispatcher, &body).await;

        assert!(matches!(
            outcome,
            WebhookOutcome::AckedWithInternalFailure {
                error: DispatchError::MissingField { field: "subscription", .. },
                ..
            }
        ));
        assert!(store.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_subscription_object() {
        let store = InMemoryStore::new();
        let dispatcher = dispatcher(Arc::new(store.clone()));
        let body = event("customer.subscription.updated", json!({"customer": "cus_2"}));

        let outcome = deliver(&dispatcher, &body).await;

        assert!(matches!(
            outcome,
            WebhookOutcome::AckedWithInternalFailure {
                error: DispatchError::MalformedPayload { .. },
                ..
            }
        ));
        assert!(store.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_bad_signature_is_rejected_before_dispatch() {
        let store = InMemoryStore::new();
        let dispatcher = dispatcher(Arc::new(store.clone()));
        let body = event(
            "checkout.session.completed",
            json!({"id": "cs_1", "subscription": "sub_1", "customer": "cus_1"}),
        );
        let header = sign("whsec_forged", NOW, &body).unwrap();

        let outcome = dispatcher.handle_at(&body, Some(&header), NOW).await;

        assert!(matches!(
            outcome,
            WebhookOutcome::Rejected(SignatureError::NoMatchingSignature)
        ));
        assert!(store.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_header_is_rejected() {
        let store = InMemoryStore::new();
        let dispatcher = dispatcher(Arc::new(store.clone()));
        let body = event("invoice.paid", json!({}));

        let outcome = dispatcher.handle_at(&body, None, NOW).await;

        assert!(matches!(
            outcome,
            WebhookOutcome::Rejected(SignatureError::MissingHeader)
        ));
    }
}

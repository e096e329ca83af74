//! Provider event types.
//!
//! An [`InboundEvent`] only exists after its signature has been verified. The
//! payload object stays untyped until the dispatcher knows which shape to
//! expect for the event type.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

/// Event types this service acts on. Everything else is acknowledged and
/// ignored.
pub const RELEVANT_EVENTS: [&str; 3] = [
    "checkout.session.completed",
    "customer.subscription.updated",
    "customer.subscription.deleted",
];

/// Whether `event_type` is in the allow-set.
pub fn is_relevant(event_type: &str) -> bool {
    RELEVANT_EVENTS.contains(&event_type)
}

/// A verified provider event.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    #[serde(default)]
    pub livemode: bool,
    /// Only relevant events read the payload, so a missing one is left for
    /// dispatch to report.
    #[serde(default)]
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub object: serde_json::Value,
}

impl InboundEvent {
    /// Deserialize `data.object` into the shape expected for this event.
    pub fn object<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data.object)
    }
}

/// A reference that is either a bare id or the expanded object.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Expandable {
    Id(String),
    Object { id: String },
}

impl Expandable {
    pub fn id(&self) -> &str {
        match self {
            Expandable::Id(id) => id,
            Expandable::Object { id } => id,
        }
    }
}

/// `data.object` of `customer.subscription.*` events.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    pub customer: Option<Expandable>,
    #[serde(default)]
    pub status: Option<String>,
}

/// `data.object` of `checkout.session.completed`.
///
/// The session is not the subscription; it references the subscription it
/// created.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionObject {
    pub id: String,
    pub subscription: Option<Expandable>,
    pub customer: Option<Expandable>,
    #[serde(default)]
    pub mode: Option<String>,
}

/// A relevant event type reached dispatch without a matching case.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unhandled event: {0}")]
pub struct UnhandledEventError(pub String);

/// The closed set of event types with a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelevantEvent {
    CheckoutSessionCompleted,
    SubscriptionUpdated,
    SubscriptionDeleted,
}

impl RelevantEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelevantEvent::CheckoutSessionCompleted => "checkout.session.completed",
            RelevantEvent::SubscriptionUpdated => "customer.subscription.updated",
            RelevantEvent::SubscriptionDeleted => "customer.subscription.deleted",
        }
    }
}

impl TryFrom<&str> for RelevantEvent {
    type Error = UnhandledEventError;

    fn try_from(event_type: &str) -> Result<Self, Self::Error> {
        match event_type {
            "checkout.session.completed" => Ok(RelevantEvent::CheckoutSessionCompleted),
            "customer.subscription.updated" => Ok(RelevantEvent::SubscriptionUpdated),
            "customer.subscription.deleted" => Ok(RelevantEvent::SubscriptionDeleted),
            other => Err(UnhandledEventError(other.to_string())),
        }
    }
}

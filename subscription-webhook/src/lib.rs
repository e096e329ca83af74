//! Subhook - subscription lifecycle webhook receiver.
//!
//! Receives signed payment provider events and reconciles them into an
//! active/inactive record per subscription.
//!
//! ## Architecture
//!
//! ```text
//! POST /api/webhooks → raw body → signature check → event type → upsert → 200
//! ```

pub mod config;
pub mod content;
pub mod dispatch;
pub mod events;
pub mod store;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError};
pub use content::{create_content_client, ContentClient};
pub use dispatch::{Ack, DispatchError, EventDispatcher, WebhookOutcome};
pub use events::{InboundEvent, RelevantEvent, RELEVANT_EVENTS};
pub use store::{
    HttpSubscriptionStore, InMemoryStore, StoreError, SubscriptionRecord, SubscriptionStore,
};
pub use web::AppState;

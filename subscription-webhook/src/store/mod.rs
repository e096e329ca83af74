//! Subscription persistence.
//!
//! The webhook core only ever issues upserts keyed by subscription id. It
//! never reads stored records back; conflict handling is last-write-wins in
//! whichever backend implements [`SubscriptionStore`].
//!
//! ## Backends
//!
//! ```text
//! InMemoryStore         → process-local map (tests, local runs)
//! HttpSubscriptionStore → PUT {base}/subscriptions/{id}
//! ```

pub mod memory;
pub mod remote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::InMemoryStore;
pub use remote::HttpSubscriptionStore;

/// The stored state of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub subscription_id: String,
    pub customer_id: String,
    pub is_active: bool,
}

impl SubscriptionRecord {
    pub fn new(subscription_id: &str, customer_id: &str, is_active: bool) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            customer_id: customer_id.to_string(),
            is_active,
        }
    }
}

/// Failure reported by a subscription backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("subscription store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("subscription store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid subscription store url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("subscription store unavailable: {0}")]
    Unavailable(String),
}

/// Upsert-only access to subscription records.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert or replace the record for `subscription_id`.
    async fn save_subscription(
        &self,
        subscription_id: &str,
        customer_id: &str,
        is_active: bool,
    ) -> Result<(), StoreError>;
}

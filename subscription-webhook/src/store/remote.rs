//! HTTP-backed subscription store.
//!
//! Each upsert is a single idempotent `PUT {base}/subscriptions/{id}` with the
//! full record as JSON. The backend decides conflicts (last write wins).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{info, warn};
use url::Url;

use super::{StoreError, SubscriptionRecord, SubscriptionStore};

/// Subscription store reached over HTTP.
#[derive(Clone)]
pub struct HttpSubscriptionStore {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpSubscriptionStore {
    /// Create a store rooted at `base_url`.
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self, StoreError> {
        let base_url = Url::parse(base_url)?;

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    /// URL of a single subscription record. The id is percent-encoded as one
    /// path segment.
    fn record_url(&self, subscription_id: &str) -> Result<Url, StoreError> {
        let mut url = self.base_url.clone();

        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .push("subscriptions")
            .push(subscription_id);

        Ok(url)
    }
}

#[async_trait]
impl SubscriptionStore for HttpSubscriptionStore {
    async fn save_subscription(
        &self,
        subscription_id: &str,
        customer_id: &str,
        is_active: bool,
    ) -> Result<(), StoreError> {
        let url = self.record_url(subscription_id)?;
        let record = SubscriptionRecord::new(subscription_id, customer_id, is_active);

        let mut request = self.client.put(url).json(&record);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                subscription_id = %subscription_id,
                status = status.as_u16(),
                "remote_subscription_save_rejected"
            );
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!(
            subscription_id = %subscription_id,
            customer_id = %customer_id,
            is_active = is_active,
            status = status.as_u16(),
            "remote_subscription_saved"
        );

        Ok(())
    }
}

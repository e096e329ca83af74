//! Process-local subscription store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use super::{StoreError, SubscriptionRecord, SubscriptionStore};

/// Subscription records held in memory.
///
/// Cloning shares the same underlying map. Test builds also keep a log of
/// every upsert in arrival order.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<RwLock<StoreInner>>,
}

#[derive(Default)]
struct StoreInner {
    records: HashMap<String, SubscriptionRecord>,
    #[cfg(test)]
    calls: Vec<SubscriptionRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current record for `subscription_id`, if any.
    pub async fn get(&self, subscription_id: &str) -> Option<SubscriptionRecord> {
        self.inner.read().await.records.get(subscription_id).cloned()
    }

    /// Every upsert received, oldest first.
    #[cfg(test)]
    pub async fn calls(&self) -> Vec<SubscriptionRecord> {
        self.inner.read().await.calls.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn save_subscription(
        &self,
        subscription_id: &str,
        customer_id: &str,
        is_active: bool,
    ) -> Result<(), StoreError> {
        let record = SubscriptionRecord::new(subscription_id, customer_id, is_active);

        let mut inner = self.inner.write().await;
        #[cfg(test)]
        inner.calls.push(record.clone());
        inner.records.insert(record.subscription_id.clone(), record);

        info!(
            subscription_id = %subscription_id,
            customer_id = %customer_id,
            is_active = is_active,
            "memory_subscription_saved"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_inserts_then_replaces() {
        let store = InMemoryStore::new();

        store.save_subscription("sub_1", "cus_1", true).await.unwrap();
        assert_eq!(
            store.get("sub_1").await,
            Some(SubscriptionRecord::new("sub_1", "cus_1", true))
        );

        store.save_subscription("sub_1", "cus_1", false).await.unwrap();
        assert_eq!(
            store.get("sub_1").await,
            Some(SubscriptionRecord::new("sub_1", "cus_1", false))
        );

        assert_eq!(store.len().await, 1);
        assert_eq!(store.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_upserts_keep_one_record() {
        let store = InMemoryStore::new();

        for _ in 0..1000 {
            store.save_subscription("sub_1", "cus_1", true).await.unwrap();
        }

        assert_eq!(store.len().await, 1);
        assert_eq!(
            store.get("sub_1").await,
            Some(SubscriptionRecord::new("sub_1", "cus_1", true))
        );
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let store = InMemoryStore::new();
        let handle = store.clone();

        handle.save_subscription("sub_9", "cus_9", true).await.unwrap();

        assert!(!store.is_empty().await);
        assert!(store.get("sub_9").await.is_some());
    }

    #[tokio::test]
    async fn test_missing_record() {
        let store = InMemoryStore::new();
        assert!(store.is_empty().await);
        assert_eq!(store.get("sub_missing").await, None);
    }
}

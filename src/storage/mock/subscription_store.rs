//! Mock subscription store.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::interfaces::subscription_store::{Result, SubscriptionStore};

/// In-memory subscription store with the same set semantics as the MongoDB
/// store, including the upsert-on-remove behavior.
#[derive(Default)]
pub struct MockSubscriptionStore {
    subscriptions: RwLock<HashMap<String, Vec<String>>>,
}

impl MockSubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event types that have a document, subscribed to or not.
    pub async fn topics(&self) -> Vec<String> {
        self.subscriptions.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl SubscriptionStore for MockSubscriptionStore {
    async fn store(&self, topic: &str, subscriber_endpoint: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        let endpoints = subscriptions.entry(topic.to_string()).or_default();
        if !endpoints.iter().any(|endpoint| endpoint == subscriber_endpoint) {
            endpoints.push(subscriber_endpoint.to_string());
        }
        Ok(())
    }

    async fn remove(&self, topic: &str, subscriber_endpoint: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.write().await;
        // Creates the document if absent, mirroring the upsert-on-remove.
        let endpoints = subscriptions.entry(topic.to_string()).or_default();
        endpoints.retain(|endpoint| endpoint != subscriber_endpoint);
        Ok(())
    }

    async fn get_subscribers(&self, topic: &str) -> Result<Vec<String>> {
        Ok(self
            .subscriptions
            .read()
            .await
            .get(topic)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_then_remove() {
        let store = MockSubscriptionStore::new();
        store.store("OrderPlaced", "q1").await.unwrap();
        store.store("OrderPlaced", "q1").await.unwrap();
        store.store("OrderPlaced", "q2").await.unwrap();
        store.remove("OrderPlaced", "q1").await.unwrap();

        assert_eq!(store.get_subscribers("OrderPlaced").await.unwrap(), ["q2"]);
    }

    #[tokio::test]
    async fn test_repeated_store_is_idempotent() {
        let store = MockSubscriptionStore::new();
        for _ in 0..5 {
            store.store("OrderPlaced", "q1").await.unwrap();
        }
        assert_eq!(store.get_subscribers("OrderPlaced").await.unwrap(), ["q1"]);
    }

    #[tokio::test]
    async fn test_unknown_topic_has_no_subscribers() {
        let store = MockSubscriptionStore::new();
        assert!(store.get_subscribers("Unknown").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_from_absent_topic_creates_empty_document() {
        let store = MockSubscriptionStore::new();
        store.remove("OrderPlaced", "q1").await.unwrap();
        assert_eq!(store.topics().await, ["OrderPlaced"]);
        assert!(store.get_subscribers("OrderPlaced").await.unwrap().is_empty());
    }
}

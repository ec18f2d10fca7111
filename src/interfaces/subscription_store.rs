//! Subscription persistence interface.

use async_trait::async_trait;

/// Result type for subscription store operations.
pub type Result<T> = std::result::Result<T, SubscriptionStoreError>;

/// Errors from subscription store operations.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionStoreError {
    #[error("MongoDB error: {0}")]
    Database(#[from] mongodb::error::Error),
}

/// Interface for event subscriptions.
///
/// Set semantics make `store` and `remove` idempotent; there is no
/// optimistic concurrency.
///
/// Implementations:
/// - `MongoSubscriptionStore`: MongoDB storage
/// - `MockSubscriptionStore`: in-memory mock for testing
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Add a subscriber endpoint for an event type.
    async fn store(&self, topic: &str, subscriber_endpoint: &str) -> Result<()>;

    /// Remove a subscriber endpoint for an event type.
    async fn remove(&self, topic: &str, subscriber_endpoint: &str) -> Result<()>;

    /// All subscriber endpoints for an event type; empty when the event type
    /// has never been subscribed to.
    async fn get_subscribers(&self, topic: &str) -> Result<Vec<String>>;
}

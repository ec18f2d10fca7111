//! Storage configuration types.

use serde::Deserialize;

/// Storage configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// MongoDB connection configuration.
    pub mongodb: MongodbConfig,
    /// Saga store configuration.
    pub sagas: SagaStoreConfig,
    /// Timeout store configuration.
    pub timeouts: TimeoutStoreConfig,
    /// Subscription store configuration.
    pub subscriptions: SubscriptionStoreConfig,
}

/// MongoDB connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MongodbConfig {
    /// Connection URI. The path segment names the target database.
    pub uri: String,
}

impl Default for MongodbConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017/granary".to_string(),
        }
    }
}

/// Saga store configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SagaStoreConfig {
    /// Store unregistered saga types in `sagas_<TypeName>` collections
    /// instead of failing. Default: false
    pub allow_automatic_collection_names: bool,
}

/// Timeout store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutStoreConfig {
    /// Collection holding deferred timeouts.
    pub collection: String,
    /// Lease duration in milliseconds for due timeouts handed to a poller.
    /// Must exceed the 300 ms poll interval.
    pub lock_offset_ms: u64,
    /// Maximum batch returned by one poll. Must be positive.
    pub max_due_timeouts: usize,
}

impl Default for TimeoutStoreConfig {
    fn default() -> Self {
        Self {
            collection: "timeouts".to_string(),
            lock_offset_ms: 5_000,
            max_due_timeouts: 5,
        }
    }
}

/// Subscription store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubscriptionStoreConfig {
    /// Collection holding subscription documents.
    pub collection: String,
}

impl Default for SubscriptionStoreConfig {
    fn default() -> Self {
        Self {
            collection: "subscriptions".to_string(),
        }
    }
}

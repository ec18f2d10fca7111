//! Granary - MongoDB persistence for a service bus.
//!
//! Backs a bus runtime with three persistence services behind well-defined
//! contracts: saga state with revision-based optimistic locking and unique
//! correlation indexes, event subscriptions, and deferred timeouts dequeued
//! in lease-guarded batches.

pub mod config;
pub mod interfaces;
pub mod storage;
pub mod utils;

// Re-export common types for library usage
pub use config::Config;
pub use interfaces::{
    DueTimeout, NewTimeout, SagaData, SagaStore, SagaStoreError, SubscriptionStore,
    SubscriptionStoreError, TimeoutStore, TimeoutStoreError,
};
pub use storage::{
    init_storage, MongoSagaStore, MongoSagaStoreBuilder, MongoSubscriptionStore, MongoTimeoutStore,
};
pub use utils::clock::{Clock, ManualClock, SystemClock};

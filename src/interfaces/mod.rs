//! Capability contracts the bus runtime calls.
//!
//! These traits define the contracts for:
//! - Saga persistence (revision-locked workflow state)
//! - Subscription persistence (event type → subscriber endpoints)
//! - Timeout persistence (lease-dequeued deferred messages)

pub mod saga_store;
pub mod subscription_store;
pub mod timeout_store;

pub use saga_store::{SagaData, SagaStore, SagaStoreError};
pub use subscription_store::{SubscriptionStore, SubscriptionStoreError};
pub use timeout_store::{DueTimeout, NewTimeout, TimeoutStore, TimeoutStoreError};

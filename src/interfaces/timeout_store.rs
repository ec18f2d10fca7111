//! Timeout persistence interface.
//!
//! Timeouts are deferred messages: stored with an absolute due instant,
//! leased in batches to poller workers once due, and deleted when the
//! poller marks them processed. A lease that expires before the poller
//! finishes makes the timeout available again, so delivery is
//! at-least-once.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use uuid::Uuid;

/// Result type for timeout store operations.
pub type Result<T> = std::result::Result<T, TimeoutStoreError>;

/// Errors from timeout store operations.
#[derive(Debug, thiserror::Error)]
pub enum TimeoutStoreError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("malformed timeout document: {0}")]
    MalformedDocument(#[from] mongodb::bson::document::ValueAccessError),

    #[error("MongoDB error: {0}")]
    Database(#[from] mongodb::error::Error),
}

/// The cadence at which the bus polls `get_due_timeouts`. The lease duration
/// must exceed it, or an expiring lease could race the very next poll.
pub const DUE_TIMEOUTS_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Default lease duration for due timeouts handed to a poller.
pub const DEFAULT_LOCK_OFFSET: Duration = Duration::from_secs(5);

/// Default maximum batch returned by one poll.
pub const DEFAULT_MAX_DUE_TIMEOUTS: usize = 5;

/// A deferred message to be stored for future delivery.
#[derive(Debug, Clone)]
pub struct NewTimeout {
    /// Absolute instant at which the timeout is due.
    pub due_time: DateTime<Utc>,
    /// Correlation identifier of the originating workflow, if any.
    pub correlation_id: Option<String>,
    /// Saga the timeout belongs to; may be the nil UUID.
    pub saga_id: Option<Uuid>,
    /// Opaque payload.
    pub data: Option<String>,
    /// Originating queue address.
    pub reply_to: Option<String>,
}

/// A due timeout leased to the calling poller.
///
/// The `id` binds the value to its backing document, which is what
/// `TimeoutStore::mark_as_processed` deletes.
#[derive(Debug, Clone)]
pub struct DueTimeout {
    pub id: ObjectId,
    pub due_time: DateTime<Utc>,
    pub correlation_id: Option<String>,
    pub saga_id: Option<Uuid>,
    pub data: Option<String>,
    pub reply_to: Option<String>,
}

/// Interface for timeout persistence.
///
/// Safe for concurrent pollers: two overlapping `get_due_timeouts` calls
/// never return the same document within one lease window.
///
/// Implementations:
/// - `MongoTimeoutStore`: MongoDB storage
/// - `MockTimeoutStore`: in-memory mock for testing
#[async_trait]
pub trait TimeoutStore: Send + Sync {
    /// Store one deferred message, initially unleased.
    async fn add(&self, timeout: NewTimeout) -> Result<()>;

    /// Lease and return up to the configured batch of timeouts that are due
    /// and not currently leased, in ascending `(time, due_lock)` order.
    async fn get_due_timeouts(&self) -> Result<Vec<DueTimeout>>;

    /// Delete the backing document. Deleting a document another consumer
    /// already removed is a no-op.
    async fn mark_as_processed(&self, timeout: &DueTimeout) -> Result<()>;
}

/// Shared constructor validation for timeout store implementations.
pub(crate) fn validate_config(lock_offset: Duration, max_due_timeouts: usize) -> Result<()> {
    if lock_offset <= DUE_TIMEOUTS_POLL_INTERVAL {
        return Err(TimeoutStoreError::InvalidConfiguration(format!(
            "lock offset {lock_offset:?} must exceed the poll interval {DUE_TIMEOUTS_POLL_INTERVAL:?}"
        )));
    }
    if max_due_timeouts == 0 {
        return Err(TimeoutStoreError::InvalidConfiguration(
            "max due timeouts retrieved must be positive".to_string(),
        ));
    }
    Ok(())
}

//! Saga persistence interface.

use std::borrow::Cow;

use async_trait::async_trait;
use mongodb::bson::Bson;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, SagaStoreError>;

/// Errors from saga store operations.
#[derive(Debug, thiserror::Error)]
pub enum SagaStoreError {
    /// Concurrent modification detected, or a unique-correlation collision.
    ///
    /// Raised when a conditional update/delete matched nothing (another
    /// worker moved the revision first) and on any duplicate-key write
    /// violation, whether on the primary key or on a correlation index.
    #[error("optimistic locking conflict for saga {saga_id} at revision {revision}")]
    OptimisticLockingConflict {
        saga_id: Uuid,
        revision: u64,
        #[source]
        source: Option<mongodb::error::Error>,
    },

    #[error("saga type {0} is already mapped to a collection")]
    DuplicateCollectionMapping(String),

    #[error(
        "no collection mapped for saga type {saga_type}; register it explicitly \
         or enable automatic collection names to store it as \"sagas_{saga_type}\""
    )]
    MissingCollectionMapping { saga_type: String },

    /// An index already exists on a correlation path but is not a unique
    /// foreground index, so it cannot be trusted to enforce correlation
    /// uniqueness.
    #[error("index on {path} in collection {collection} is not a unique foreground index")]
    IndexMisconfigured { collection: String, path: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("BSON serialization error: {0}")]
    Serialize(#[from] mongodb::bson::ser::Error),

    #[error("BSON deserialization error: {0}")]
    Deserialize(#[from] mongodb::bson::de::Error),

    #[error("MongoDB error: {0}")]
    Database(#[from] mongodb::error::Error),
}

/// State carried by a long-running correlated workflow.
///
/// The `revision` member is persisted under the element name `_rev` and the
/// `id` member under `_id`; both mappings come from [`SagaData::element_name`]
/// rather than being hardcoded at call sites, so a type that overrides the
/// convention keeps working with the store's conditional filters.
pub trait SagaData: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Saga instance identity, stable for the lifetime of the instance.
    /// Serves as the document primary key.
    fn id(&self) -> Uuid;

    /// Optimistic-locking revision. Incremented by exactly one on every
    /// successful insert or update.
    fn revision(&self) -> u64;

    fn set_revision(&mut self, revision: u64);

    /// Maps an application-form property path to its persisted element name.
    ///
    /// The default convention maps `id` to `_id` and `revision` to `_rev`;
    /// every other path passes through unchanged, which also covers dotted
    /// nested paths.
    fn element_name(path: &str) -> Cow<'static, str> {
        match path {
            "id" => Cow::Borrowed("_id"),
            "revision" => Cow::Borrowed("_rev"),
            other => Cow::Owned(other.to_string()),
        }
    }
}

/// Interface for saga persistence.
///
/// Implementations:
/// - `MongoSagaStore`: MongoDB storage
/// - `MockSagaStore`: in-memory mock for testing
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Persist a new saga datum, bumping the caller's revision by one.
    ///
    /// `correlation_paths` name the properties whose values must be unique
    /// across all instances of the saga type; the store asserts a unique
    /// index for each before writing.
    async fn insert<T: SagaData>(&self, data: &mut T, correlation_paths: &[&str]) -> Result<()>;

    /// Conditionally replace the stored document matching the datum's id and
    /// current revision, bumping the caller's revision by one.
    async fn update<T: SagaData>(&self, data: &mut T, correlation_paths: &[&str]) -> Result<()>;

    /// Conditionally delete the stored document matching the datum's id and
    /// current revision.
    async fn delete<T: SagaData>(&self, data: &T) -> Result<()>;

    /// Single-document lookup where the element mapped from `property_path`
    /// equals `value`.
    async fn find<T: SagaData>(&self, property_path: &str, value: Bson) -> Result<Option<T>>;
}

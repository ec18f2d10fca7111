//! Storage implementations and wiring.

use std::any::TypeId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::StorageConfig;
use crate::interfaces::saga_store::{Result as SagaResult, SagaData, SagaStoreError};
use crate::interfaces::timeout_store::TimeoutStoreError;
use crate::utils::clock::SystemClock;

pub mod mapping;
pub mod mock;
pub mod mongodb;

pub use mongodb::{MongoSagaStore, MongoSagaStoreBuilder, MongoSubscriptionStore, MongoTimeoutStore};

/// Errors while wiring storage from configuration.
#[derive(Debug, thiserror::Error)]
pub enum StorageSetupError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Timeout(#[from] TimeoutStoreError),

    #[error("MongoDB error: {0}")]
    Database(#[from] ::mongodb::error::Error),
}

/// Initialize the persistence stores from configuration.
///
/// Builds one lazily connecting client and returns the saga, timeout, and
/// subscription stores backed by the database named in the connection
/// string's path segment.
pub async fn init_storage(
    config: &StorageConfig,
) -> Result<
    (
        Arc<MongoSagaStore>,
        Arc<MongoTimeoutStore>,
        Arc<MongoSubscriptionStore>,
    ),
    StorageSetupError,
> {
    let database = connect(&config.mongodb.uri).await?;

    let mut saga_builder = MongoSagaStore::builder(database.clone());
    if config.sagas.allow_automatic_collection_names {
        saga_builder = saga_builder.allow_automatic_collection_names();
    }
    let saga_store = Arc::new(saga_builder.build());

    let timeout_store = Arc::new(
        MongoTimeoutStore::new(
            database.clone(),
            &config.timeouts.collection,
            Arc::new(SystemClock),
            Duration::from_millis(config.timeouts.lock_offset_ms),
            config.timeouts.max_due_timeouts,
        )
        .await?,
    );

    let subscription_store = Arc::new(MongoSubscriptionStore::new(
        database,
        &config.subscriptions.collection,
    ));

    Ok((saga_store, timeout_store, subscription_store))
}

/// Open the database named by the connection string's path segment.
///
/// The client connects lazily; no I/O happens here beyond URI resolution.
pub async fn connect(uri: &str) -> Result<::mongodb::Database, StorageSetupError> {
    let options = ::mongodb::options::ClientOptions::parse(uri).await?;
    let database_name = options
        .default_database
        .clone()
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| {
            StorageSetupError::InvalidConfiguration(
                "connection string does not name a database in its path segment".to_string(),
            )
        })?;

    let client = ::mongodb::Client::with_options(options)?;
    info!(database = %database_name, "Storage: mongodb");
    Ok(client.database(&database_name))
}

/// Saga type → collection name mapping.
///
/// Explicit registrations win; the opt-in convention maps an unregistered
/// type to `sagas_<TypeName>`. The mapping is immutable once the owning
/// store is built.
#[derive(Debug, Default)]
pub struct SagaCollectionNames {
    names: HashMap<TypeId, String>,
    allow_automatic: bool,
}

impl SagaCollectionNames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_automatic(&mut self) {
        self.allow_automatic = true;
    }

    /// Register an explicit collection name for a saga type. Registering the
    /// same type twice is a configuration error.
    pub fn register<T: SagaData>(&mut self, collection_name: impl Into<String>) -> SagaResult<()> {
        let name = collection_name.into();
        match self.names.entry(TypeId::of::<T>()) {
            Entry::Occupied(_) => Err(SagaStoreError::DuplicateCollectionMapping(
                saga_type_name::<T>().to_string(),
            )),
            Entry::Vacant(entry) => {
                info!(
                    saga_type = saga_type_name::<T>(),
                    collection = %name,
                    "Mapped saga type to collection"
                );
                entry.insert(name);
                Ok(())
            }
        }
    }

    /// Resolve the collection name for a saga type.
    pub fn resolve<T: SagaData>(&self) -> SagaResult<String> {
        if let Some(name) = self.names.get(&TypeId::of::<T>()) {
            return Ok(name.clone());
        }
        if self.allow_automatic {
            return Ok(format!("sagas_{}", saga_type_name::<T>()));
        }
        Err(SagaStoreError::MissingCollectionMapping {
            saga_type: saga_type_name::<T>().to_string(),
        })
    }
}

/// Simple (unqualified) name of a saga type.
pub(crate) fn saga_type_name<T: 'static>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[derive(serde::Serialize, serde::Deserialize)]
    struct OrderSaga {
        id: Uuid,
        revision: u64,
    }

    impl SagaData for OrderSaga {
        fn id(&self) -> Uuid {
            self.id
        }
        fn revision(&self) -> u64 {
            self.revision
        }
        fn set_revision(&mut self, revision: u64) {
            self.revision = revision;
        }
    }

    #[test]
    fn test_explicit_mapping_wins() {
        let mut names = SagaCollectionNames::new();
        names.register::<OrderSaga>("order_sagas").unwrap();
        assert_eq!(names.resolve::<OrderSaga>().unwrap(), "order_sagas");
    }

    #[test]
    fn test_duplicate_mapping_is_rejected() {
        let mut names = SagaCollectionNames::new();
        names.register::<OrderSaga>("order_sagas").unwrap();
        let result = names.register::<OrderSaga>("other");
        assert!(matches!(
            result,
            Err(SagaStoreError::DuplicateCollectionMapping(_))
        ));
    }

    #[test]
    fn test_convention_fallback_when_enabled() {
        let mut names = SagaCollectionNames::new();
        names.allow_automatic();
        assert_eq!(names.resolve::<OrderSaga>().unwrap(), "sagas_OrderSaga");
    }

    #[test]
    fn test_unregistered_type_fails_without_convention() {
        let names = SagaCollectionNames::new();
        let result = names.resolve::<OrderSaga>();
        assert!(matches!(
            result,
            Err(SagaStoreError::MissingCollectionMapping { .. })
        ));
    }

    #[test]
    fn test_missing_mapping_message_names_both_options() {
        let names = SagaCollectionNames::new();
        let message = names.resolve::<OrderSaga>().unwrap_err().to_string();
        assert!(message.contains("register it explicitly"));
        assert!(message.contains("automatic collection names"));
    }

    #[tokio::test]
    async fn test_connect_rejects_uri_without_database() {
        let result = connect("mongodb://localhost:27017").await;
        assert!(matches!(
            result,
            Err(StorageSetupError::InvalidConfiguration(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_resolves_database_from_path() {
        let database = connect("mongodb://localhost:27017/granary_test")
            .await
            .unwrap();
        assert_eq!(database.name(), "granary_test");
    }
}

//! MongoDB saga store with revision-based optimistic locking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use mongodb::options::{Acknowledgment, CollectionOptions, IndexOptions, WriteConcern};
use mongodb::{Collection, Database, IndexModel};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::interfaces::saga_store::{Result, SagaData, SagaStore, SagaStoreError};
use crate::storage::{mapping, SagaCollectionNames};
use crate::utils::jitter;

/// Default cadence for re-asserting correlation indexes.
const DEFAULT_INDEX_DECLARATION_INTERVAL: Duration = Duration::from_secs(600);
const DEFAULT_INDEX_DECLARATION_VARIATION: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct IndexDeclarationCadence {
    interval: Duration,
    variation: Duration,
}

impl Default for IndexDeclarationCadence {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INDEX_DECLARATION_INTERVAL,
            variation: DEFAULT_INDEX_DECLARATION_VARIATION,
        }
    }
}

/// Configures and builds a [`MongoSagaStore`].
///
/// Collection mappings are fixed once `build` is called; the store itself
/// exposes no way to change them.
pub struct MongoSagaStoreBuilder {
    database: Database,
    collection_names: SagaCollectionNames,
}

impl MongoSagaStoreBuilder {
    /// Register an explicit collection name for a saga type.
    pub fn map_collection<T: SagaData>(mut self, collection_name: impl Into<String>) -> Result<Self> {
        self.collection_names.register::<T>(collection_name)?;
        Ok(self)
    }

    /// Store unregistered saga types in `sagas_<TypeName>` collections
    /// instead of failing.
    pub fn allow_automatic_collection_names(mut self) -> Self {
        self.collection_names.allow_automatic();
        self
    }

    /// Finish configuration and start the index re-assertion timer.
    pub fn build(self) -> MongoSagaStore {
        let store = MongoSagaStore {
            database: self.database,
            collection_names: self.collection_names,
            index_ensured_recently: Arc::new(AtomicBool::new(false)),
            index_declaration_lock: tokio::sync::Mutex::new(()),
            index_declaration_cadence: StdMutex::new(IndexDeclarationCadence::default()),
            reset_task: StdMutex::new(None),
        };
        store.restart_reset_task();
        store
    }
}

/// MongoDB implementation of [`SagaStore`].
///
/// Each saga type lives in its own collection. Writes go through an
/// acknowledged write concern regardless of connection-string defaults;
/// conditional filters derive element names from the saga type's naming
/// convention.
pub struct MongoSagaStore {
    database: Database,
    collection_names: SagaCollectionNames,
    index_ensured_recently: Arc<AtomicBool>,
    index_declaration_lock: tokio::sync::Mutex<()>,
    index_declaration_cadence: StdMutex<IndexDeclarationCadence>,
    reset_task: StdMutex<Option<JoinHandle<()>>>,
}

impl MongoSagaStore {
    pub fn builder(database: Database) -> MongoSagaStoreBuilder {
        MongoSagaStoreBuilder {
            database,
            collection_names: SagaCollectionNames::new(),
        }
    }

    /// Change the index re-assertion cadence and restart its timer.
    ///
    /// The timer fires at a per-process jittered interval in
    /// `[interval - variation, interval + variation]` and clears the
    /// ensured flag, so the next insert or update re-checks the indexes.
    pub fn set_index_declaration_interval(
        &self,
        interval: Duration,
        variation: Duration,
    ) -> Result<()> {
        if variation > interval {
            return Err(SagaStoreError::InvalidConfiguration(format!(
                "index declaration variation {variation:?} exceeds the interval {interval:?}"
            )));
        }
        {
            let mut cadence = self
                .index_declaration_cadence
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            *cadence = IndexDeclarationCadence { interval, variation };
        }
        info!(?interval, ?variation, "Restarting index declaration timer");
        self.restart_reset_task();
        Ok(())
    }

    fn restart_reset_task(&self) {
        let cadence = *self
            .index_declaration_cadence
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let flag = Arc::clone(&self.index_ensured_recently);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(jitter::jittered(cadence.interval, cadence.variation)).await;
                flag.store(false, Ordering::SeqCst);
            }
        });
        let mut slot = self.reset_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    fn collection_for<T: SagaData>(&self) -> Result<Collection<Document>> {
        let name = self.collection_names.resolve::<T>()?;
        let options = CollectionOptions::builder()
            .write_concern(WriteConcern::builder().w(Acknowledgment::Nodes(1)).build())
            .build();
        Ok(self.database.collection_with_options(&name, options))
    }

    /// Re-assert unique correlation indexes if the periodic timer has fired
    /// since the last pass.
    ///
    /// Double-checked: the flag is read again under the mutex so concurrent
    /// operations do one sweep between timer ticks, not one each.
    async fn ensure_correlation_indexes<T: SagaData>(
        &self,
        collection: &Collection<Document>,
        correlation_paths: &[&str],
    ) -> Result<()> {
        if self.index_ensured_recently.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.index_declaration_lock.lock().await;
        if self.index_ensured_recently.load(Ordering::SeqCst) {
            return Ok(());
        }

        // Single-key indexes only; compound indexes never count as coverage.
        let mut existing: HashMap<String, (bool, bool)> = HashMap::new();
        let mut cursor = collection.list_indexes().await?;
        while cursor.advance().await? {
            let index = cursor.deserialize_current()?;
            if index.keys.len() != 1 {
                continue;
            }
            let Some(field) = index.keys.keys().next() else {
                continue;
            };
            let options = index.options.unwrap_or_default();
            existing.insert(
                field.clone(),
                (
                    options.unique.unwrap_or(false),
                    options.background.unwrap_or(false),
                ),
            );
        }

        let id_element = T::element_name("id");
        for path in correlation_paths {
            let element = T::element_name(path);
            if element == id_element {
                // The primary key already guarantees uniqueness.
                continue;
            }
            match existing.get(element.as_ref()) {
                Some(&(true, false)) => {}
                Some(_) => {
                    return Err(SagaStoreError::IndexMisconfigured {
                        collection: collection.name().to_string(),
                        path: element.into_owned(),
                    });
                }
                None => {
                    info!(
                        collection = collection.name(),
                        element = %element,
                        "Creating unique correlation index"
                    );
                    let mut keys = Document::new();
                    keys.insert(element.as_ref(), 1);
                    let index = IndexModel::builder()
                        .keys(keys)
                        .options(IndexOptions::builder().unique(true).build())
                        .build();
                    collection.create_index(index).await?;
                }
            }
        }

        self.index_ensured_recently.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MongoSagaStore {
    fn drop(&mut self) {
        let mut slot = self.reset_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl SagaStore for MongoSagaStore {
    async fn insert<T: SagaData>(&self, data: &mut T, correlation_paths: &[&str]) -> Result<()> {
        let collection = self.collection_for::<T>()?;
        self.ensure_correlation_indexes::<T>(&collection, correlation_paths)
            .await?;

        if data.revision() != 0 {
            warn!(
                saga_id = %data.id(),
                revision = data.revision(),
                "Inserting saga data with a nonzero revision"
            );
        }
        data.set_revision(data.revision() + 1);
        let document = mapping::to_persisted_document(data)?;

        collection
            .insert_one(document)
            .await
            .map_err(|e| map_write_error(e, data.id(), data.revision()))?;
        Ok(())
    }

    async fn update<T: SagaData>(&self, data: &mut T, correlation_paths: &[&str]) -> Result<()> {
        let collection = self.collection_for::<T>()?;
        self.ensure_correlation_indexes::<T>(&collection, correlation_paths)
            .await?;

        let expected_revision = data.revision();
        data.set_revision(expected_revision + 1);
        let document = mapping::to_persisted_document(data)?;

        let result = collection
            .replace_one(revision_filter::<T>(data.id(), expected_revision), document)
            .await
            .map_err(|e| map_write_error(e, data.id(), expected_revision))?;

        if result.modified_count == 0 {
            return Err(SagaStoreError::OptimisticLockingConflict {
                saga_id: data.id(),
                revision: expected_revision,
                source: None,
            });
        }
        Ok(())
    }

    async fn delete<T: SagaData>(&self, data: &T) -> Result<()> {
        let collection = self.collection_for::<T>()?;

        let result = collection
            .delete_one(revision_filter::<T>(data.id(), data.revision()))
            .await?;

        if result.deleted_count == 0 {
            return Err(SagaStoreError::OptimisticLockingConflict {
                saga_id: data.id(),
                revision: data.revision(),
                source: None,
            });
        }
        Ok(())
    }

    async fn find<T: SagaData>(&self, property_path: &str, value: Bson) -> Result<Option<T>> {
        let collection = self.collection_for::<T>()?;

        let mut filter = Document::new();
        filter.insert(T::element_name(property_path), value);

        let document = collection.find_one(filter).await?;
        document.map(mapping::from_persisted_document::<T>).transpose()
    }
}

/// Conditional filter matching a saga document at an exact revision, with
/// element names resolved through the saga type's naming convention.
fn revision_filter<T: SagaData>(saga_id: Uuid, revision: u64) -> Document {
    let mut filter = Document::new();
    filter.insert(T::element_name("id"), saga_id.to_string());
    filter.insert(T::element_name("revision"), revision as i64);
    filter
}

/// Duplicate-key violations (code 11000) mean either a primary-key collision
/// or a unique-correlation collision; both surface as optimistic-locking
/// conflicts. Everything else propagates unchanged.
fn map_write_error(error: mongodb::error::Error, saga_id: Uuid, revision: u64) -> SagaStoreError {
    if is_duplicate_key(&error) {
        SagaStoreError::OptimisticLockingConflict {
            saga_id,
            revision,
            source: Some(error),
        }
    } else {
        SagaStoreError::Database(error)
    }
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    if let mongodb::error::ErrorKind::Write(mongodb::error::WriteFailure::WriteError(
        ref write_error,
    )) = *error.kind
    {
        return write_error.code == 11000;
    }
    false
}

//! Mock saga store.

use std::collections::HashMap;

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};
use tokio::sync::RwLock;

use crate::interfaces::saga_store::{Result, SagaData, SagaStore, SagaStoreError};
use crate::storage::{mapping, SagaCollectionNames};

/// In-memory saga store mirroring the MongoDB store's semantics.
///
/// Documents are stored through the same persisted-document remapping as the
/// real store, so the `_id`/`_rev` element names and the revision/uniqueness
/// rules are exercised end to end.
#[derive(Default)]
pub struct MockSagaStore {
    collection_names: SagaCollectionNames,
    collections: RwLock<HashMap<String, Vec<Document>>>,
}

impl MockSagaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn map_collection<T: SagaData>(mut self, collection_name: impl Into<String>) -> Result<Self> {
        self.collection_names.register::<T>(collection_name)?;
        Ok(self)
    }

    pub fn allow_automatic_collection_names(mut self) -> Self {
        self.collection_names.allow_automatic();
        self
    }

    /// Raw documents currently stored for a collection.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SagaStore for MockSagaStore {
    async fn insert<T: SagaData>(&self, data: &mut T, correlation_paths: &[&str]) -> Result<()> {
        let collection_name = self.collection_names.resolve::<T>()?;
        data.set_revision(data.revision() + 1);
        let document = mapping::to_persisted_document(data)?;

        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection_name).or_default();

        let id_element = T::element_name("id");
        if documents
            .iter()
            .any(|existing| existing.get(id_element.as_ref()) == document.get(id_element.as_ref()))
        {
            return Err(conflict(data.id(), data.revision()));
        }
        for path in correlation_paths {
            let element = T::element_name(path);
            if element == id_element {
                continue;
            }
            let value = document.get(element.as_ref());
            if value.is_some()
                && documents
                    .iter()
                    .any(|existing| existing.get(element.as_ref()) == value)
            {
                return Err(conflict(data.id(), data.revision()));
            }
        }

        documents.push(document);
        Ok(())
    }

    async fn update<T: SagaData>(&self, data: &mut T, correlation_paths: &[&str]) -> Result<()> {
        let collection_name = self.collection_names.resolve::<T>()?;
        let expected_revision = data.revision();
        data.set_revision(expected_revision + 1);
        let document = mapping::to_persisted_document(data)?;

        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection_name).or_default();

        let id_element = T::element_name("id");
        let rev_element = T::element_name("revision");
        let id_value = Bson::String(data.id().to_string());

        let position = documents.iter().position(|existing| {
            existing.get(id_element.as_ref()) == Some(&id_value)
                && revision_matches(existing.get(rev_element.as_ref()), expected_revision)
        });
        let Some(position) = position else {
            return Err(conflict(data.id(), expected_revision));
        };

        for path in correlation_paths {
            let element = T::element_name(path);
            if element == id_element {
                continue;
            }
            let value = document.get(element.as_ref());
            if value.is_some()
                && documents.iter().enumerate().any(|(index, existing)| {
                    index != position && existing.get(element.as_ref()) == value
                })
            {
                return Err(conflict(data.id(), expected_revision));
            }
        }

        documents[position] = document;
        Ok(())
    }

    async fn delete<T: SagaData>(&self, data: &T) -> Result<()> {
        let collection_name = self.collection_names.resolve::<T>()?;

        let mut collections = self.collections.write().await;
        let documents = collections.entry(collection_name).or_default();

        let id_element = T::element_name("id");
        let rev_element = T::element_name("revision");
        let id_value = Bson::String(data.id().to_string());

        let position = documents.iter().position(|existing| {
            existing.get(id_element.as_ref()) == Some(&id_value)
                && revision_matches(existing.get(rev_element.as_ref()), data.revision())
        });
        let Some(position) = position else {
            return Err(conflict(data.id(), data.revision()));
        };

        documents.remove(position);
        Ok(())
    }

    async fn find<T: SagaData>(&self, property_path: &str, value: Bson) -> Result<Option<T>> {
        let collection_name = self.collection_names.resolve::<T>()?;
        let element = T::element_name(property_path);

        let collections = self.collections.read().await;
        let Some(documents) = collections.get(&collection_name) else {
            return Ok(None);
        };
        documents
            .iter()
            .find(|existing| existing.get(element.as_ref()) == Some(&value))
            .cloned()
            .map(mapping::from_persisted_document::<T>)
            .transpose()
    }
}

fn conflict(saga_id: uuid::Uuid, revision: u64) -> SagaStoreError {
    SagaStoreError::OptimisticLockingConflict {
        saga_id,
        revision,
        source: None,
    }
}

fn revision_matches(value: Option<&Bson>, revision: u64) -> bool {
    match value {
        Some(Bson::Int64(stored)) => *stored == revision as i64,
        Some(Bson::Int32(stored)) => i64::from(*stored) == revision as i64,
        _ => false,
    }
}

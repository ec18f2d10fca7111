//! Persisted-document remapping for saga data.
//!
//! Saga data serializes through serde into a BSON document whose top-level
//! element names are then rewritten through the saga type's naming
//! convention: `id` lands under `_id`, `revision` under `_rev`, everything
//! else unchanged. Reads apply the inverse rewrite before deserializing, so
//! saga types need no serde rename attributes for the conventional members.
//!
//! The inverse covers the convention's remapped members (`id`, `revision`);
//! a type that remaps other members through `element_name` should align its
//! serde attributes for those instead.

use mongodb::bson::{self, Document};

use crate::interfaces::saga_store::{Result, SagaData};

/// Serialize saga data into the document persisted to its collection.
pub fn to_persisted_document<T: SagaData>(data: &T) -> Result<Document> {
    let document = bson::to_document(data)?;
    let mut persisted = Document::new();
    for (key, value) in document {
        persisted.insert(T::element_name(&key), value);
    }
    Ok(persisted)
}

/// Deserialize saga data from a persisted document.
pub fn from_persisted_document<T: SagaData>(mut document: Document) -> Result<T> {
    for field in ["id", "revision"] {
        let element = T::element_name(field);
        if element != field {
            if let Some(value) = document.remove(element.as_ref()) {
                document.insert(field, value);
            }
        }
    }
    Ok(bson::from_document(document)?)
}

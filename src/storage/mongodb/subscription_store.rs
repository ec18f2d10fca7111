//! MongoDB subscription store.

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::UpdateOptions;
use mongodb::{Collection, Database};
use tracing::debug;

use crate::interfaces::subscription_store::{Result, SubscriptionStore};

/// MongoDB implementation of [`SubscriptionStore`].
///
/// One document per event type, keyed by the type's full name, holding the
/// subscriber endpoints as a set-valued `endpoints` field.
pub struct MongoSubscriptionStore {
    subscriptions: Collection<Document>,
}

impl MongoSubscriptionStore {
    pub fn new(database: Database, collection_name: &str) -> Self {
        Self {
            subscriptions: database.collection(collection_name),
        }
    }
}

#[async_trait]
impl SubscriptionStore for MongoSubscriptionStore {
    async fn store(&self, topic: &str, subscriber_endpoint: &str) -> Result<()> {
        let options = UpdateOptions::builder().upsert(true).build();
        self.subscriptions
            .update_one(
                doc! { "_id": topic },
                doc! { "$addToSet": { "endpoints": subscriber_endpoint } },
            )
            .with_options(options)
            .await?;
        debug!(topic, endpoint = subscriber_endpoint, "Subscription stored");
        Ok(())
    }

    async fn remove(&self, topic: &str, subscriber_endpoint: &str) -> Result<()> {
        // Upsert on remove may create an empty document; harmless.
        let options = UpdateOptions::builder().upsert(true).build();
        self.subscriptions
            .update_one(
                doc! { "_id": topic },
                doc! { "$pull": { "endpoints": subscriber_endpoint } },
            )
            .with_options(options)
            .await?;
        debug!(topic, endpoint = subscriber_endpoint, "Subscription removed");
        Ok(())
    }

    async fn get_subscribers(&self, topic: &str) -> Result<Vec<String>> {
        let document = self.subscriptions.find_one(doc! { "_id": topic }).await?;
        let Some(document) = document else {
            return Ok(Vec::new());
        };

        let endpoints = match document.get_array("endpoints") {
            Ok(values) => values
                .iter()
                .filter_map(|value| match value {
                    Bson::String(endpoint) => Some(endpoint.clone()),
                    _ => None,
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        Ok(endpoints)
    }
}

//! MongoDB storage integration tests.
//!
//! Run with: cargo test --test storage_mongodb -- --ignored --nocapture
//!
//! Requires: MONGODB_URI env var or MongoDB on localhost:27017

use std::sync::Arc;
use std::time::Duration;

use mongodb::bson::{doc, Bson, Document};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use granary::{
    Clock, ManualClock, MongoSagaStore, MongoSubscriptionStore, MongoTimeoutStore, NewTimeout,
    SagaData, SagaStore, SagaStoreError, SubscriptionStore, TimeoutStore,
};

fn mongodb_uri() -> String {
    std::env::var("MONGODB_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string())
}

fn mongodb_database() -> String {
    std::env::var("MONGODB_DATABASE").unwrap_or_else(|_| "granary_test".to_string())
}

async fn database() -> mongodb::Database {
    let client = mongodb::Client::with_uri_str(&mongodb_uri())
        .await
        .expect("Failed to connect to MongoDB");
    client.database(&mongodb_database())
}

async fn reset_collection(database: &mongodb::Database, name: &str) {
    let _ = database.collection::<Document>(name).drop().await;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderSaga {
    id: Uuid,
    revision: u64,
    customer_id: String,
    balance: i64,
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

fn order_saga(customer_id: &str) -> OrderSaga {
    OrderSaga {
        id: Uuid::new_v4(),
        revision: 0,
        customer_id: customer_id.to_string(),
        balance: 0,
    }
}

async fn saga_store(database: &mongodb::Database, collection: &str) -> MongoSagaStore {
    MongoSagaStore::builder(database.clone())
        .map_collection::<OrderSaga>(collection)
        .expect("Failed to map saga collection")
        .build()
}

#[tokio::test]
#[ignore = "requires running MongoDB instance"]
async fn test_saga_insert_update_delete_happy_path() {
    let database = database().await;
    reset_collection(&database, "it_order_sagas").await;
    let store = saga_store(&database, "it_order_sagas").await;

    let mut data = order_saga("C1");
    store.insert(&mut data, &["customer_id"]).await.unwrap();
    assert_eq!(data.revision, 1);

    // The revision element is stored under `_rev`.
    let raw = database
        .collection::<Document>("it_order_sagas")
        .find_one(doc! { "_id": data.id.to_string() })
        .await
        .unwrap()
        .expect("saga document missing");
    assert_eq!(raw.get_i64("_rev").unwrap(), 1);
    assert!(!raw.contains_key("revision"));

    let mut found: OrderSaga = store
        .find("customer_id", Bson::String("C1".to_string()))
        .await
        .unwrap()
        .expect("saga not found by correlation value");
    assert_eq!(found.revision, 1);

    found.balance = 10;
    store.update(&mut found, &["customer_id"]).await.unwrap();
    assert_eq!(found.revision, 2);

    let reloaded: OrderSaga = store
        .find("customer_id", Bson::String("C1".to_string()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reloaded.balance, 10);
    assert_eq!(reloaded.revision, 2);

    store.delete(&reloaded).await.unwrap();
    let count = database
        .collection::<Document>("it_order_sagas")
        .count_documents(doc! {})
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
#[ignore = "requires running MongoDB instance"]
async fn test_saga_optimistic_collision_on_update() {
    let database = database().await;
    reset_collection(&database, "it_collision_sagas").await;
    let store = saga_store(&database, "it_collision_sagas").await;

    let mut data = order_saga("C2");
    store.insert(&mut data, &["customer_id"]).await.unwrap();

    let mut first: OrderSaga = store
        .find("customer_id", Bson::String("C2".to_string()))
        .await
        .unwrap()
        .unwrap();
    let mut second = first.clone();

    store.update(&mut first, &["customer_id"]).await.unwrap();
    assert_eq!(first.revision, 2);

    let result = store.update(&mut second, &["customer_id"]).await;
    assert!(matches!(
        result,
        Err(SagaStoreError::OptimisticLockingConflict { .. })
    ));
}

#[tokio::test]
#[ignore = "requires running MongoDB instance"]
async fn test_saga_correlation_uniqueness() {
    let database = database().await;
    reset_collection(&database, "it_unique_sagas").await;
    let store = saga_store(&database, "it_unique_sagas").await;

    let mut first = order_saga("C3");
    store.insert(&mut first, &["customer_id"]).await.unwrap();

    let mut duplicate = order_saga("C3");
    let result = store.insert(&mut duplicate, &["customer_id"]).await;
    assert!(matches!(
        result,
        Err(SagaStoreError::OptimisticLockingConflict { .. })
    ));
}

#[tokio::test]
#[ignore = "requires running MongoDB instance"]
async fn test_saga_correlation_index_shape() {
    let database = database().await;
    reset_collection(&database, "it_index_sagas").await;
    let store = saga_store(&database, "it_index_sagas").await;

    let mut data = order_saga("C4");
    store.insert(&mut data, &["customer_id", "id"]).await.unwrap();

    let collection = database.collection::<Document>("it_index_sagas");
    let mut cursor = collection.list_indexes().await.unwrap();
    let mut correlation_indexes = Vec::new();
    while cursor.advance().await.unwrap() {
        let index = cursor.deserialize_current().unwrap();
        if index.keys.len() == 1 && index.keys.contains_key("customer_id") {
            correlation_indexes.push(index);
        }
    }

    assert_eq!(correlation_indexes.len(), 1);
    let index = &correlation_indexes[0];
    assert_eq!(index.keys.get("customer_id"), Some(&Bson::Int32(1)));
    let options = index.options.clone().unwrap_or_default();
    assert_eq!(options.unique, Some(true));
    assert_ne!(options.background, Some(true));
}

#[tokio::test]
#[ignore = "requires running MongoDB instance"]
async fn test_saga_automatic_collection_names() {
    let database = database().await;
    reset_collection(&database, "sagas_OrderSaga").await;

    let store = MongoSagaStore::builder(database.clone())
        .allow_automatic_collection_names()
        .build();
    let mut data = order_saga("C5");
    store.insert(&mut data, &["customer_id"]).await.unwrap();

    let count = database
        .collection::<Document>("sagas_OrderSaga")
        .count_documents(doc! {})
        .await
        .unwrap();
    assert_eq!(count, 1);

    // Without the toggle the same insert fails.
    let strict = MongoSagaStore::builder(database.clone()).build();
    let mut other = order_saga("C6");
    let result = strict.insert(&mut other, &["customer_id"]).await;
    assert!(matches!(
        result,
        Err(SagaStoreError::MissingCollectionMapping { .. })
    ));
}

#[tokio::test]
#[ignore = "requires running MongoDB instance"]
async fn test_timeout_lease_non_overlap() {
    let database = database().await;
    reset_collection(&database, "it_timeouts").await;

    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let store = Arc::new(
        MongoTimeoutStore::new(
            database.clone(),
            "it_timeouts",
            clock.clone(),
            Duration::from_secs(5),
            2,
        )
        .await
        .unwrap(),
    );

    let past = clock.now() - chrono::Duration::seconds(1);
    for _ in 0..3 {
        store
            .add(NewTimeout {
                due_time: past,
                correlation_id: Some("corr".to_string()),
                saga_id: Some(Uuid::nil()),
                data: Some("payload".to_string()),
                reply_to: Some("queue-a".to_string()),
            })
            .await
            .unwrap();
    }

    let (first, second) = tokio::join!(
        {
            let store = store.clone();
            async move { store.get_due_timeouts().await.unwrap() }
        },
        {
            let store = store.clone();
            async move { store.get_due_timeouts().await.unwrap() }
        }
    );

    let first_ids: std::collections::HashSet<_> = first.iter().map(|t| t.id).collect();
    let second_ids: std::collections::HashSet<_> = second.iter().map(|t| t.id).collect();
    assert!(first_ids.is_disjoint(&second_ids));
    assert_eq!(first_ids.len() + second_ids.len(), 3);

    // Nothing marked processed; everything reappears once the lease expires.
    clock.advance(chrono::Duration::seconds(6));
    let third = store.get_due_timeouts().await.unwrap();
    assert_eq!(third.len(), 2);
    let fourth = store.get_due_timeouts().await.unwrap();
    assert_eq!(fourth.len(), 1);
}

#[tokio::test]
#[ignore = "requires running MongoDB instance"]
async fn test_timeout_mark_as_processed_deletes() {
    let database = database().await;
    reset_collection(&database, "it_processed_timeouts").await;

    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let store = MongoTimeoutStore::new(
        database.clone(),
        "it_processed_timeouts",
        clock.clone(),
        Duration::from_secs(5),
        5,
    )
    .await
    .unwrap();

    store
        .add(NewTimeout {
            due_time: clock.now() - chrono::Duration::seconds(1),
            correlation_id: None,
            saga_id: None,
            data: None,
            reply_to: None,
        })
        .await
        .unwrap();

    let due = store.get_due_timeouts().await.unwrap();
    assert_eq!(due.len(), 1);
    store.mark_as_processed(&due[0]).await.unwrap();

    // Delete of an already-deleted document is a no-op.
    store.mark_as_processed(&due[0]).await.unwrap();

    let count = database
        .collection::<Document>("it_processed_timeouts")
        .count_documents(doc! {})
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
#[ignore = "requires running MongoDB instance"]
async fn test_subscription_set_semantics() {
    let database = database().await;
    reset_collection(&database, "it_subscriptions").await;

    let store = MongoSubscriptionStore::new(database.clone(), "it_subscriptions");

    store.store("OrderPlaced", "q1").await.unwrap();
    store.store("OrderPlaced", "q1").await.unwrap();
    store.store("OrderPlaced", "q2").await.unwrap();
    store.remove("OrderPlaced", "q1").await.unwrap();

    assert_eq!(store.get_subscribers("OrderPlaced").await.unwrap(), ["q2"]);
    assert!(store.get_subscribers("Unknown").await.unwrap().is_empty());
}

//! MongoDB timeout store with lease-based dequeue.
//!
//! Due timeouts are leased to one poller at a time by atomically stamping a
//! `due_lock` instant with `findOneAndUpdate`; the pre-image comes back to
//! the caller. A poller that dies keeps the lease only until `due_lock`
//! passes, after which the timeout is dequeued again — at-least-once
//! delivery. Processing ends with an unconditional delete.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};
use tracing::debug;
use uuid::Uuid;

use crate::interfaces::timeout_store::{
    validate_config, DueTimeout, NewTimeout, Result, TimeoutStore,
};
use crate::utils::clock::Clock;

/// MongoDB implementation of [`TimeoutStore`].
pub struct MongoTimeoutStore {
    timeouts: Collection<Document>,
    clock: Arc<dyn Clock>,
    lock_offset: chrono::Duration,
    max_due_timeouts: usize,
}

impl MongoTimeoutStore {
    /// Create a new MongoDB timeout store.
    ///
    /// `lock_offset` is the lease duration and must exceed the 300 ms poll
    /// interval; `max_due_timeouts` bounds one poll's batch and must be
    /// positive.
    pub async fn new(
        database: Database,
        collection_name: &str,
        clock: Arc<dyn Clock>,
        lock_offset: Duration,
        max_due_timeouts: usize,
    ) -> Result<Self> {
        validate_config(lock_offset, max_due_timeouts)?;

        let store = Self {
            timeouts: database.collection(collection_name),
            clock,
            lock_offset: chrono::Duration::milliseconds(lock_offset.as_millis() as i64),
            max_due_timeouts,
        };
        store.init().await?;
        Ok(store)
    }

    /// Non-unique background index matching the dequeue filter and sort.
    /// Not unique because the same `(time, due_lock)` may legitimately
    /// repeat.
    async fn init(&self) -> Result<()> {
        let index = IndexModel::builder()
            .keys(doc! { "time": 1, "due_lock": 1 })
            .options(IndexOptions::builder().background(true).build())
            .build();
        self.timeouts.create_index(index).await?;
        Ok(())
    }
}

#[async_trait]
impl TimeoutStore for MongoTimeoutStore {
    async fn add(&self, timeout: NewTimeout) -> Result<()> {
        self.timeouts
            .insert_one(new_timeout_document(&timeout))
            .await?;
        debug!(due_time = %timeout.due_time, "Deferred timeout stored");
        Ok(())
    }

    async fn get_due_timeouts(&self) -> Result<Vec<DueTimeout>> {
        let now = self.clock.now();
        let now_bson = to_bson_datetime(now);
        let lease_until = to_bson_datetime(now + self.lock_offset);

        // Due and not currently leased. Null and expired leases both count
        // as available; $lt against a date never matches the null branch.
        let filter = doc! {
            "time": { "$lte": now_bson },
            "$or": [
                { "due_lock": Bson::Null },
                { "due_lock": { "$lt": now_bson } },
            ],
        };
        let options = FindOneAndUpdateOptions::builder()
            .sort(doc! { "time": 1, "due_lock": 1 })
            .return_document(ReturnDocument::Before)
            .build();

        let mut due = Vec::new();
        while due.len() < self.max_due_timeouts {
            let leased = self
                .timeouts
                .find_one_and_update(
                    filter.clone(),
                    doc! { "$set": { "due_lock": lease_until } },
                )
                .with_options(options.clone())
                .await?;
            match leased {
                Some(document) => due.push(due_timeout_from_document(document)?),
                None => break,
            }
        }

        debug!(count = due.len(), "Leased due timeouts");
        Ok(due)
    }

    async fn mark_as_processed(&self, timeout: &DueTimeout) -> Result<()> {
        self.timeouts
            .delete_one(doc! { "_id": timeout.id })
            .await?;
        Ok(())
    }
}

fn new_timeout_document(timeout: &NewTimeout) -> Document {
    doc! {
        "time": to_bson_datetime(timeout.due_time),
        "corr_id": opt_string(timeout.correlation_id.as_deref()),
        "saga_id": opt_string(timeout.saga_id.map(|id| id.to_string()).as_deref()),
        "data": opt_string(timeout.data.as_deref()),
        "reply_to": opt_string(timeout.reply_to.as_deref()),
        "due_lock": Bson::Null,
    }
}

fn due_timeout_from_document(document: Document) -> Result<DueTimeout> {
    let id = document.get_object_id("_id")?;
    let due_time = from_bson_datetime(*document.get_datetime("time")?);
    let saga_id = document
        .get_str("saga_id")
        .ok()
        .and_then(|raw| Uuid::parse_str(raw).ok());
    Ok(DueTimeout {
        id,
        due_time,
        correlation_id: document.get_str("corr_id").ok().map(str::to_string),
        saga_id,
        data: document.get_str("data").ok().map(str::to_string),
        reply_to: document.get_str("reply_to").ok().map(str::to_string),
    })
}

fn opt_string(value: Option<&str>) -> Bson {
    match value {
        Some(value) => Bson::String(value.to_string()),
        None => Bson::Null,
    }
}

fn to_bson_datetime(instant: DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(instant.timestamp_millis())
}

fn from_bson_datetime(instant: BsonDateTime) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(instant.timestamp_millis()).unwrap_or(DateTime::UNIX_EPOCH)
}

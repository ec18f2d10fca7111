//! Mock timeout store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::interfaces::timeout_store::{
    validate_config, DueTimeout, NewTimeout, Result, TimeoutStore,
};
use crate::utils::clock::Clock;

struct StoredTimeout {
    id: ObjectId,
    due_time: DateTime<Utc>,
    correlation_id: Option<String>,
    saga_id: Option<Uuid>,
    data: Option<String>,
    reply_to: Option<String>,
    due_lock: Option<DateTime<Utc>>,
}

/// In-memory timeout store with the same lease semantics as the MongoDB
/// store. The whole batch transition happens under one lock, so concurrent
/// pollers observe disjoint batches.
pub struct MockTimeoutStore {
    clock: Arc<dyn Clock>,
    lock_offset: chrono::Duration,
    max_due_timeouts: usize,
    timeouts: Mutex<Vec<StoredTimeout>>,
}

impl MockTimeoutStore {
    pub fn new(
        clock: Arc<dyn Clock>,
        lock_offset: Duration,
        max_due_timeouts: usize,
    ) -> Result<Self> {
        validate_config(lock_offset, max_due_timeouts)?;
        Ok(Self {
            clock,
            lock_offset: chrono::Duration::milliseconds(lock_offset.as_millis() as i64),
            max_due_timeouts,
            timeouts: Mutex::new(Vec::new()),
        })
    }

    /// Number of documents currently stored, leased or not.
    pub async fn len(&self) -> usize {
        self.timeouts.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TimeoutStore for MockTimeoutStore {
    async fn add(&self, timeout: NewTimeout) -> Result<()> {
        self.timeouts.lock().await.push(StoredTimeout {
            id: ObjectId::new(),
            due_time: timeout.due_time,
            correlation_id: timeout.correlation_id,
            saga_id: timeout.saga_id,
            data: timeout.data,
            reply_to: timeout.reply_to,
            due_lock: None,
        });
        Ok(())
    }

    async fn get_due_timeouts(&self) -> Result<Vec<DueTimeout>> {
        let now = self.clock.now();
        let lease_until = now + self.lock_offset;
        let mut timeouts = self.timeouts.lock().await;

        // Available items in (time, due_lock) order; an absent lease sorts
        // first, like BSON null before dates.
        let mut candidates: Vec<usize> = timeouts
            .iter()
            .enumerate()
            .filter(|(_, stored)| {
                stored.due_time <= now && stored.due_lock.map_or(true, |lock| lock < now)
            })
            .map(|(index, _)| index)
            .collect();
        candidates.sort_by_key(|&index| (timeouts[index].due_time, timeouts[index].due_lock));

        let mut due = Vec::new();
        for index in candidates.into_iter().take(self.max_due_timeouts) {
            let stored = &mut timeouts[index];
            stored.due_lock = Some(lease_until);
            due.push(DueTimeout {
                id: stored.id,
                due_time: stored.due_time,
                correlation_id: stored.correlation_id.clone(),
                saga_id: stored.saga_id,
                data: stored.data.clone(),
                reply_to: stored.reply_to.clone(),
            });
        }
        Ok(due)
    }

    async fn mark_as_processed(&self, timeout: &DueTimeout) -> Result<()> {
        self.timeouts
            .lock()
            .await
            .retain(|stored| stored.id != timeout.id);
        Ok(())
    }
}

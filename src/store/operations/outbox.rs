use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use uuid::Uuid;

use crate::events::RatingChangeEvent;
use crate::store::keys;
use crate::store::{flatten_tx_error, Store, StoreError};

/// A committed rating change that not every queue has confirmed yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub event: RatingChangeEvent,
    pub enqueued_at: DateTime<Utc>,
    /// Process run that last handed the event to the broker; `None` until the
    /// first publish.
    #[serde(default)]
    pub published_by: Option<Uuid>,
    /// Queues holding a copy that has not been acknowledged yet.
    #[serde(default)]
    pub pending_queues: Vec<String>,
}

impl OutboxEntry {
    pub fn new(event: RatingChangeEvent, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            event,
            enqueued_at,
            published_by: None,
            pending_queues: Vec::new(),
        }
    }
}

fn abort_serde(error: serde_json::Error) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(StoreError::Serialization(error))
}

fn read_entry(
    tree: &TransactionalTree,
    key: &[u8],
) -> Result<Option<OutboxEntry>, ConflictableTransactionError<StoreError>> {
    match tree.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw).map_err(abort_serde)?)),
        None => Ok(None),
    }
}

impl Store {
    /// Entries the run `run_id` should hand to the broker again, oldest first,
    /// at most `limit`.
    ///
    /// Entries published by another run are always due: their copies were lost
    /// with that run's queues. Entries never published are due once enqueued
    /// before `cutoff`. Entries this run published are still in its queues.
    pub fn relayable_outbox(
        &self,
        run_id: Uuid,
        cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let mut entries = Vec::new();
        for item in self.outbox.iter() {
            let (_, value) = item?;
            let entry: OutboxEntry = Self::deserialize(&value)?;
            let due = match entry.published_by {
                Some(publisher) => publisher != run_id,
                None => entry.enqueued_at < cutoff,
            };
            if due {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        entries.truncate(limit);
        Ok(entries)
    }

    /// Record that `run_id` is about to copy the event onto `queues`.
    ///
    /// Returns `false` when the entry is gone, i.e. every queue already
    /// confirmed it. With no queues left to deliver to the entry is dropped.
    pub fn mark_outbox_published(&self, event_id: Uuid, run_id: Uuid, queues: &[String]) -> Result<bool, StoreError> {
        let key = keys::outbox_key(&event_id.to_string());

        self.outbox
            .transaction(|tree| {
                let Some(mut entry) = read_entry(tree, key.as_bytes())? else {
                    return Ok(false);
                };
                if queues.is_empty() {
                    tree.remove(key.as_bytes())?;
                    return Ok(false);
                }
                entry.published_by = Some(run_id);
                entry.pending_queues = queues.to_vec();
                tree.insert(key.as_bytes(), serde_json::to_vec(&entry).map_err(abort_serde)?)?;
                Ok(true)
            })
            .map_err(flatten_tx_error)
    }

    /// A queue acknowledged its copy. The entry is removed once no published
    /// copy is outstanding. Returns `true` when the entry was removed.
    pub fn settle_outbox(&self, event_id: Uuid, queue: &str) -> Result<bool, StoreError> {
        let key = keys::outbox_key(&event_id.to_string());

        self.outbox
            .transaction(|tree| {
                let Some(mut entry) = read_entry(tree, key.as_bytes())? else {
                    return Ok(false);
                };
                entry.pending_queues.retain(|pending| pending != queue);
                if entry.published_by.is_some() && entry.pending_queues.is_empty() {
                    tree.remove(key.as_bytes())?;
                    return Ok(true);
                }
                tree.insert(key.as_bytes(), serde_json::to_vec(&entry).map_err(abort_serde)?)?;
                Ok(false)
            })
            .map_err(flatten_tx_error)
    }

    pub fn get_outbox(&self, event_id: Uuid) -> Result<Option<OutboxEntry>, StoreError> {
        match self.outbox.get(keys::outbox_key(&event_id.to_string()))? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.len()
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::Transactional;
use uuid::Uuid;

use crate::events::RatingChangeEvent;
use crate::store::keys;
use crate::store::operations::outbox::OutboxEntry;
use crate::store::{flatten_tx_error, Store, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub user_id: u64,
    pub release_id: u64,
    pub score: f64,
    /// `score × rater weight` at write time; not refreshed when weights change.
    pub weighted_score: f64,
    /// Bumped on every write; change events carry it so consumers can order them.
    #[serde(default)]
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of a committed rating write.
#[derive(Debug, Clone)]
pub struct RatingWrite {
    pub rating: Rating,
    pub created: bool,
    pub event: RatingChangeEvent,
}

fn abort_serde(error: serde_json::Error) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(StoreError::Serialization(error))
}

fn read_rating(
    tree: &TransactionalTree,
    key: &[u8],
) -> Result<Option<Rating>, ConflictableTransactionError<StoreError>> {
    match tree.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_slice(&raw).map_err(abort_serde)?)),
        None => Ok(None),
    }
}

impl Store {
    /// Insert or replace the `(user, release)` rating.
    ///
    /// The rating, its per-release index entry and the outbox entry for the
    /// resulting change event commit together or not at all.
    pub fn upsert_rating(
        &self,
        user_id: u64,
        release_id: u64,
        score: f64,
        weight: f64,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RatingWrite, StoreError> {
        let primary_key = keys::rating_key(user_id, release_id);
        let index_key = keys::rating_by_release_key(release_id, user_id);
        let outbox_key = keys::outbox_key(&event_id.to_string());

        (&self.ratings, &self.ratings_by_release, &self.outbox)
            .transaction(|(ratings, index, outbox)| {
                let existing = read_rating(ratings, &primary_key)?;
                let created = existing.is_none();
                let old_score = existing.as_ref().map(|previous| previous.score);
                let revision = existing.as_ref().map_or(0, |previous| previous.revision) + 1;

                let rating = Rating {
                    user_id,
                    release_id,
                    score,
                    weighted_score: score * weight,
                    revision,
                    created_at: existing.as_ref().map_or(now, |previous| previous.created_at),
                    updated_at: now,
                };
                let event = RatingChangeEvent {
                    event_id,
                    user_id,
                    item_id: release_id,
                    old_score,
                    new_score: score,
                    is_created: created,
                    revision,
                    occurred_at: now,
                };
                let entry = OutboxEntry::new(event.clone(), now);

                ratings.insert(&primary_key[..], serde_json::to_vec(&rating).map_err(abort_serde)?)?;
                index.insert(&index_key[..], &[])?;
                outbox.insert(outbox_key.as_bytes(), serde_json::to_vec(&entry).map_err(abort_serde)?)?;

                Ok(RatingWrite {
                    rating,
                    created,
                    event,
                })
            })
            .map_err(flatten_tx_error)
    }

    pub fn get_rating(&self, user_id: u64, release_id: u64) -> Result<Option<Rating>, StoreError> {
        match self.ratings.get(keys::rating_key(user_id, release_id))? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Every rating of one release, in rater id order.
    pub fn ratings_for_release(&self, release_id: u64) -> Result<Vec<Rating>, StoreError> {
        let mut ratings = Vec::new();
        for item in self.ratings_by_release.scan_prefix(keys::id_key(release_id)) {
            let (key, _) = item?;
            let Some(user_id) = keys::decode_pair_tail(&key) else {
                continue;
            };
            // Index entries can outlive a crashed migration; the primary row is authoritative.
            if let Some(rating) = self.get_rating(user_id, release_id)? {
                ratings.push(rating);
            }
        }
        Ok(ratings)
    }
}

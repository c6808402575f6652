use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::keys;
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewStatus {
    Pending,
    Active,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: u64,
    pub user_id: u64,
    pub release_id: u64,
    pub content: String,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
}

impl Review {
    /// Length in whitespace-separated words.
    pub fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

impl Store {
    pub fn create_review(&self, review: &Review) -> Result<(), StoreError> {
        let cas_result = self.reviews.compare_and_swap(
            keys::review_key(review.user_id, review.id),
            None::<&[u8]>,
            Some(Self::serialize(review)?),
        )?;
        if cas_result.is_err() {
            return Err(StoreError::Conflict {
                entity: "review".to_string(),
                key: review.id.to_string(),
            });
        }
        Ok(())
    }

    pub fn get_review(&self, user_id: u64, review_id: u64) -> Result<Option<Review>, StoreError> {
        match self.reviews.get(keys::review_key(user_id, review_id))? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }
}

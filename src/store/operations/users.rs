use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::transaction::ConflictableTransactionError;

use crate::constants::MAX_WEIGHT;
use crate::store::keys;
use crate::store::{flatten_tx_error, Store, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub username: String,
    /// Credibility weight, always within `[0, MAX_WEIGHT]`.
    pub weighting_score: f64,
    pub last_active_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: u64, username: &str, now: DateTime<Utc>) -> Self {
        Self {
            id,
            username: username.to_string(),
            weighting_score: 0.0,
            last_active_date: now,
            created_at: now,
        }
    }
}

fn clamp_weight(weight: f64) -> f64 {
    if weight.is_nan() {
        0.0
    } else {
        weight.clamp(0.0, MAX_WEIGHT)
    }
}

impl Store {
    pub fn create_user(&self, user: &User) -> Result<(), StoreError> {
        let mut stored = user.clone();
        stored.weighting_score = clamp_weight(stored.weighting_score);
        let cas_result = self.users.compare_and_swap(
            keys::id_key(user.id),
            None::<&[u8]>,
            Some(Self::serialize(&stored)?),
        )?;

        if cas_result.is_err() {
            return Err(StoreError::Conflict {
                entity: "user".to_string(),
                key: user.id.to_string(),
            });
        }
        Ok(())
    }

    pub fn get_user(&self, user_id: u64) -> Result<Option<User>, StoreError> {
        match self.users.get(keys::id_key(user_id))? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Users with a strictly greater id than `after`, in id order.
    pub fn list_users_after(&self, after: Option<u64>, limit: usize) -> Result<Vec<User>, StoreError> {
        let mut users = Vec::with_capacity(limit);
        let iter = match after {
            Some(id) => match id.checked_add(1) {
                Some(next) => self.users.range(keys::id_key(next)..),
                None => return Ok(users),
            },
            None => self.users.iter(),
        };

        for item in iter {
            let (_, value) = item?;
            users.push(Self::deserialize::<User>(&value)?);
            if users.len() >= limit {
                break;
            }
        }
        Ok(users)
    }

    /// Current weights for the given raters; unknown ids are absent from the map.
    pub fn get_user_weights(&self, user_ids: &[u64]) -> Result<HashMap<u64, f64>, StoreError> {
        let mut weights = HashMap::with_capacity(user_ids.len());
        for user_id in user_ids {
            if weights.contains_key(user_id) {
                continue;
            }
            if let Some(user) = self.get_user(*user_id)? {
                weights.insert(*user_id, user.weighting_score);
            }
        }
        Ok(weights)
    }

    /// Overwrite the weight of every listed user in one transaction.
    ///
    /// Only the weight field is touched, so a concurrent activity update on the
    /// same row is never lost. Users deleted since the page was read are skipped.
    pub fn apply_user_weights(&self, weights: &[(u64, f64)]) -> Result<usize, StoreError> {
        let updated = self
            .users
            .transaction(|tx| {
                let mut updated = 0usize;
                for (user_id, weight) in weights {
                    let key = keys::id_key(*user_id);
                    let Some(raw) = tx.get(key)? else {
                        continue;
                    };
                    let mut user: User = serde_json::from_slice(&raw).map_err(|error| {
                        ConflictableTransactionError::Abort(StoreError::Serialization(error))
                    })?;
                    user.weighting_score = clamp_weight(*weight);
                    let bytes = serde_json::to_vec(&user).map_err(|error| {
                        ConflictableTransactionError::Abort(StoreError::Serialization(error))
                    })?;
                    tx.insert(&key[..], bytes)?;
                    updated += 1;
                }
                Ok(updated)
            })
            .map_err(flatten_tx_error)?;
        Ok(updated)
    }

    /// Move `last_active_date` forward to `at`. Never moves it backwards, so
    /// replaying the same activity is harmless. Returns `false` for unknown users.
    pub fn touch_last_active(&self, user_id: u64, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let key = keys::id_key(user_id);
        self.users
            .transaction(|tx| {
                let Some(raw) = tx.get(key)? else {
                    return Ok(false);
                };
                let mut user: User = serde_json::from_slice(&raw).map_err(|error| {
                    ConflictableTransactionError::Abort(StoreError::Serialization(error))
                })?;
                if at > user.last_active_date {
                    user.last_active_date = at;
                    let bytes = serde_json::to_vec(&user).map_err(|error| {
                        ConflictableTransactionError::Abort(StoreError::Serialization(error))
                    })?;
                    tx.insert(&key[..], bytes)?;
                }
                Ok(true)
            })
            .map_err(flatten_tx_error)
    }

    pub fn count_users(&self) -> usize {
        self.users.len()
    }
}

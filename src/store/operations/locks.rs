use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{Store, StoreError};

/// A held named lock. Expired leases are free for anyone to take.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl Store {
    /// Take the lease at `key` if it is free or expired. Never waits: losing a
    /// race against another owner returns `false`.
    pub fn try_acquire_lease(
        &self,
        key: &str,
        owner: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let current = self.cluster_locks.get(key.as_bytes())?;
        if let Some(raw) = &current {
            let held: LeaseRecord = Self::deserialize(raw)?;
            if !held.is_expired(now) {
                return Ok(false);
            }
        }

        let record = LeaseRecord {
            owner: owner.to_string(),
            acquired_at: now,
            expires_at,
        };
        let cas_result = self.cluster_locks.compare_and_swap(
            key.as_bytes(),
            current.as_deref(),
            Some(Self::serialize(&record)?),
        )?;
        Ok(cas_result.is_ok())
    }

    /// Remove the lease only if `owner` still holds it.
    pub fn release_lease(&self, key: &str, owner: &str) -> Result<bool, StoreError> {
        let Some(raw) = self.cluster_locks.get(key.as_bytes())? else {
            return Ok(false);
        };
        let held: LeaseRecord = Self::deserialize(&raw)?;
        if held.owner != owner {
            return Ok(false);
        }
        let cas_result = self
            .cluster_locks
            .compare_and_swap(key.as_bytes(), Some(&raw[..]), None::<&[u8]>)?;
        Ok(cas_result.is_ok())
    }

    pub fn get_lease(&self, key: &str) -> Result<Option<LeaseRecord>, StoreError> {
        match self.cluster_locks.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }
}

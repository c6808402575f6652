use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::store::keys;
use crate::store::operations::reviews::{Review, ReviewStatus};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseType {
    Album,
    Ep,
    Single,
    Compilation,
    Live,
}

impl ReleaseType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Album => "ALBUM",
            Self::Ep => "EP",
            Self::Single => "SINGLE",
            Self::Compilation => "COMPILATION",
            Self::Live => "LIVE",
        }
    }

    /// Case-insensitive parse of the wire name.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ALBUM" => Some(Self::Album),
            "EP" => Some(Self::Ep),
            "SINGLE" => Some(Self::Single),
            "COMPILATION" => Some(Self::Compilation),
            "LIVE" => Some(Self::Live),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseStatus {
    Pending,
    Active,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artist {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub id: u64,
    pub artist_id: Option<u64>,
    pub genre_id: Option<u64>,
    pub title: String,
    pub release_type: ReleaseType,
    pub release_date: Option<NaiveDate>,
    pub status: ReleaseStatus,
    pub created_at: DateTime<Utc>,
}

impl Release {
    pub fn is_active(&self) -> bool {
        self.status == ReleaseStatus::Active
    }

    pub fn year(&self) -> Option<i32> {
        self.release_date.map(|date| date.year())
    }
}

/// Moderated content that becomes visible once approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishTarget {
    Release(u64),
    /// Reviews are keyed by author, so both ids are needed to locate one.
    Review { user_id: u64, review_id: u64 },
}

impl Store {
    pub fn create_artist(&self, artist: &Artist) -> Result<(), StoreError> {
        self.artists
            .insert(keys::id_key(artist.id), Self::serialize(artist)?)?;
        Ok(())
    }

    pub fn get_artist(&self, artist_id: u64) -> Result<Option<Artist>, StoreError> {
        match self.artists.get(keys::id_key(artist_id))? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn create_release(&self, release: &Release) -> Result<(), StoreError> {
        let cas_result = self.releases.compare_and_swap(
            keys::id_key(release.id),
            None::<&[u8]>,
            Some(Self::serialize(release)?),
        )?;
        if cas_result.is_err() {
            return Err(StoreError::Conflict {
                entity: "release".to_string(),
                key: release.id.to_string(),
            });
        }
        Ok(())
    }

    pub fn get_release(&self, release_id: u64) -> Result<Option<Release>, StoreError> {
        match self.releases.get(keys::id_key(release_id))? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn list_active_release_ids(&self) -> Result<Vec<u64>, StoreError> {
        let mut ids = Vec::new();
        for item in self.releases.iter() {
            let (_, value) = item?;
            let release: Release = Self::deserialize(&value)?;
            if release.is_active() {
                ids.push(release.id);
            }
        }
        Ok(ids)
    }

    /// Flip a pending release or review to active. Publishing an already
    /// active target is a no-op; deleted content cannot be published.
    pub fn publish(&self, target: PublishTarget) -> Result<(), StoreError> {
        match target {
            PublishTarget::Release(release_id) => {
                let key = keys::id_key(release_id);
                let mut release = self
                    .get_release(release_id)?
                    .ok_or_else(|| StoreError::not_found("release", release_id))?;
                match release.status {
                    ReleaseStatus::Active => Ok(()),
                    ReleaseStatus::Deleted => Err(StoreError::Validation(format!(
                        "release {} is deleted",
                        release_id
                    ))),
                    ReleaseStatus::Pending => {
                        release.status = ReleaseStatus::Active;
                        self.releases.insert(key, Self::serialize(&release)?)?;
                        Ok(())
                    }
                }
            }
            PublishTarget::Review { user_id, review_id } => {
                let key = keys::review_key(user_id, review_id);
                let mut review: Review = match self.reviews.get(key)? {
                    Some(raw) => Self::deserialize(&raw)?,
                    None => return Err(StoreError::not_found("review", review_id)),
                };
                match review.status {
                    ReviewStatus::Active => Ok(()),
                    ReviewStatus::Deleted => Err(StoreError::Validation(format!(
                        "review {} is deleted",
                        review_id
                    ))),
                    ReviewStatus::Pending => {
                        review.status = ReviewStatus::Active;
                        self.reviews.insert(key, Self::serialize(&review)?)?;
                        Ok(())
                    }
                }
            }
        }
    }
}

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::keys;
use crate::store::operations::ratings::Rating;
use crate::store::operations::reviews::{Review, ReviewStatus};
use crate::store::{Store, StoreError};

/// Raw per-user aggregates feeding the weight calculation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserWeightingStats {
    pub rating_count: u64,
    /// Population variance of the user's scores.
    pub rating_variance: f64,
    pub max_rating_date: Option<DateTime<Utc>>,
    pub review_count: u64,
    /// Mean review length in words.
    pub review_avg_length: f64,
    pub max_review_date: Option<DateTime<Utc>>,
}

impl UserWeightingStats {
    /// Latest of the profile's own activity date and any rating or review.
    pub fn last_active(&self, profile_last_active: DateTime<Utc>) -> DateTime<Utc> {
        [self.max_rating_date, self.max_review_date]
            .into_iter()
            .flatten()
            .fold(profile_last_active, |latest, date| latest.max(date))
    }
}

/// Cached snapshot of the inputs and result of the last weight calculation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserWeightStats {
    pub user_id: u64,
    pub rating_count: u64,
    pub rating_variance: f64,
    pub review_count: u64,
    pub review_avg_length: f64,
    pub last_active_date: DateTime<Utc>,
    pub weight: f64,
    pub last_calculated_at: DateTime<Utc>,
}

#[derive(Default)]
struct ScoreAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
    latest: Option<DateTime<Utc>>,
}

impl ScoreAccumulator {
    fn push(&mut self, score: f64, at: DateTime<Utc>) {
        self.count += 1;
        let delta = score - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (score - self.mean);
        self.latest = Some(self.latest.map_or(at, |latest| latest.max(at)));
    }

    fn population_variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).max(0.0)
        }
    }
}

#[derive(Default)]
struct ReviewAccumulator {
    count: u64,
    words: u64,
    latest: Option<DateTime<Utc>>,
}

impl Store {
    /// Aggregate rating and review statistics for a set of users.
    ///
    /// One bounded range scan per source tree covers the whole id set, so the
    /// cost does not grow with a per-user lookup loop. Every requested id is
    /// present in the result; users with no activity get zeroed stats.
    pub fn fetch_weighting_stats(
        &self,
        user_ids: &[u64],
    ) -> Result<HashMap<u64, UserWeightingStats>, StoreError> {
        let (Some(&first), Some(&last)) = (user_ids.iter().min(), user_ids.iter().max()) else {
            return Ok(HashMap::new());
        };
        let wanted: HashSet<u64> = user_ids.iter().copied().collect();
        let (lo, hi) = keys::leading_id_range(first, last);

        let mut scores: HashMap<u64, ScoreAccumulator> = HashMap::new();
        for item in self.ratings.range(lo..=hi) {
            let (key, value) = item?;
            let Some(user_id) = keys::decode_id(&key) else {
                continue;
            };
            if !wanted.contains(&user_id) {
                continue;
            }
            let rating: Rating = Self::deserialize(&value)?;
            scores
                .entry(user_id)
                .or_default()
                .push(rating.score, rating.updated_at);
        }

        let mut reviews: HashMap<u64, ReviewAccumulator> = HashMap::new();
        for item in self.reviews.range(lo..=hi) {
            let (key, value) = item?;
            let Some(user_id) = keys::decode_id(&key) else {
                continue;
            };
            if !wanted.contains(&user_id) {
                continue;
            }
            let review: Review = Self::deserialize(&value)?;
            if review.status != ReviewStatus::Active {
                continue;
            }
            let acc = reviews.entry(user_id).or_default();
            acc.count += 1;
            acc.words += review.word_count() as u64;
            acc.latest = Some(acc.latest.map_or(review.created_at, |latest| latest.max(review.created_at)));
        }

        let stats = wanted
            .into_iter()
            .map(|user_id| {
                let mut stats = UserWeightingStats::default();
                if let Some(acc) = scores.get(&user_id) {
                    stats.rating_count = acc.count;
                    stats.rating_variance = acc.population_variance();
                    stats.max_rating_date = acc.latest;
                }
                if let Some(acc) = reviews.get(&user_id) {
                    stats.review_count = acc.count;
                    stats.review_avg_length = if acc.count == 0 {
                        0.0
                    } else {
                        acc.words as f64 / acc.count as f64
                    };
                    stats.max_review_date = acc.latest;
                }
                (user_id, stats)
            })
            .collect();

        Ok(stats)
    }

    /// Overwrite the cached rows for a chunk in one atomic batch.
    pub fn upsert_weight_stats(&self, rows: &[UserWeightStats]) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for row in rows {
            batch.insert(&keys::id_key(row.user_id)[..], Self::serialize(row)?);
        }
        self.user_weight_stats.apply_batch(batch)?;
        Ok(())
    }

    pub fn get_weight_stats(&self, user_id: u64) -> Result<Option<UserWeightStats>, StoreError> {
        match self.user_weight_stats.get(keys::id_key(user_id))? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use tempfile::tempdir;
    use uuid::Uuid;

    use super::*;

    fn review(id: u64, user_id: u64, content: &str, status: ReviewStatus, at: DateTime<Utc>) -> Review {
        Review {
            id,
            user_id,
            release_id: 1,
            content: content.to_string(),
            status,
            created_at: at,
        }
    }

    #[test]
    fn aggregates_only_requested_users() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        let now = Utc::now();

        for (release, score) in [(1, 2.0), (2, 4.0), (3, 4.0), (4, 4.0), (5, 5.0), (6, 5.0), (7, 7.0), (8, 9.0)] {
            store.upsert_rating(5, release, score, 0.0, Uuid::new_v4(), now).unwrap();
        }
        // User 6 sits inside the scanned range but was not requested.
        store.upsert_rating(6, 1, 1.0, 0.0, Uuid::new_v4(), now).unwrap();
        store.upsert_rating(7, 1, 3.0, 0.0, Uuid::new_v4(), now).unwrap();

        let stats = store.fetch_weighting_stats(&[5, 7, 9]).unwrap();
        assert_eq!(stats.len(), 3);
        assert!(!stats.contains_key(&6));

        let five = &stats[&5];
        assert_eq!(five.rating_count, 8);
        assert!((five.rating_variance - 4.0).abs() < 1e-12);
        assert_eq!(stats[&7].rating_count, 1);
        assert_eq!(stats[&7].rating_variance, 0.0);
        assert_eq!(stats[&9], UserWeightingStats::default());
    }

    #[test]
    fn only_active_reviews_count() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        let now = Utc::now();
        let later = now + Duration::days(1);

        store.create_review(&review(1, 3, "one two three four", ReviewStatus::Active, now)).unwrap();
        store.create_review(&review(2, 3, "one two", ReviewStatus::Active, later)).unwrap();
        store.create_review(&review(3, 3, "ignored entirely here", ReviewStatus::Pending, later + Duration::days(1))).unwrap();

        let stats = &store.fetch_weighting_stats(&[3]).unwrap()[&3];
        assert_eq!(stats.review_count, 2);
        assert_eq!(stats.review_avg_length, 3.0);
        assert_eq!(stats.max_review_date, Some(later));
    }

    #[test]
    fn last_active_takes_latest_source() {
        let base = Utc::now();
        let stats = UserWeightingStats {
            max_rating_date: Some(base + Duration::days(2)),
            max_review_date: Some(base + Duration::days(1)),
            ..Default::default()
        };
        assert_eq!(stats.last_active(base), base + Duration::days(2));
        assert_eq!(stats.last_active(base + Duration::days(9)), base + Duration::days(9));
        assert_eq!(UserWeightingStats::default().last_active(base), base);
    }

    #[test]
    fn upsert_overwrites_cached_row() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        let now = Utc::now();
        let mut row = UserWeightStats {
            user_id: 4,
            rating_count: 12,
            rating_variance: 1.0,
            review_count: 0,
            review_avg_length: 0.0,
            last_active_date: now,
            weight: 0.5,
            last_calculated_at: now,
        };
        store.upsert_weight_stats(&[row.clone()]).unwrap();
        row.weight = 0.75;
        store.upsert_weight_stats(&[row.clone()]).unwrap();

        assert_eq!(store.get_weight_stats(4).unwrap(), Some(row));
        assert_eq!(store.user_weight_stats.len(), 1);
    }
}
